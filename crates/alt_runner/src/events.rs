//! Runner notifications.
//!
//! Subscribers (the host process, chat panels, tests) receive typed events over
//! a broadcast channel. Publishing never blocks and never fails: with no
//! subscriber attached the event is simply dropped.

use crate::types::{AltId, GuildId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 256;

/// An alt's committed world changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldChanged {
    pub guild_id: GuildId,
    pub alt_id: AltId,
    pub label: String,
    pub world: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerEvent {
    WorldChanged(WorldChanged),
    /// An alt needs an operator to confirm a device code
    DeviceCodeIssued {
        guild_id: GuildId,
        alt_id: AltId,
        user_code: String,
        verification_uri: String,
        expires_in: u64,
    },
}

/// Statistics about published events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBusStats {
    pub events_emitted: u64,
    pub world_changes: u64,
    pub subscribers: usize,
}

#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<RunnerEvent>,
    emitted: AtomicU64,
    world_changes: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            emitted: AtomicU64::new(0),
            world_changes: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: RunnerEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        if matches!(event, RunnerEvent::WorldChanged(_)) {
            self.world_changes.fetch_add(1, Ordering::Relaxed);
        }
        if self.sender.send(event).is_err() {
            trace!("No subscribers for runner event");
        }
    }

    pub fn get_stats(&self) -> EventBusStats {
        EventBusStats {
            events_emitted: self.emitted.load(Ordering::Relaxed),
            world_changes: self.world_changes.load(Ordering::Relaxed),
            subscribers: self.sender.receiver_count(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
