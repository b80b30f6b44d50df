//! Per-alt in-memory connection state.
//!
//! One [`ConnectionState`] exists per alt for the lifetime of the runner (or
//! until the alt is deleted). It survives stop/start cycles; per-connection
//! fields are reset by [`ConnectionState::begin_connection`]. Guards are plain
//! `parking_lot` mutexes and must never be held across an `.await`.

use crate::client::GameConnection;
use crate::types::{AltId, AltStatus, GuildId, MessageId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub type SharedState = Arc<Mutex<ConnectionState>>;

pub struct ConnectionState {
    pub guild_id: GuildId,
    pub label: String,

    /// Live handle; at most one per alt
    pub connection: Option<Arc<dyn GameConnection>>,
    /// Bumped on every connect and teardown; stale event pumps compare against it
    pub generation: u64,
    pub spawned: bool,
    pub stopped: bool,
    pub backoff: Duration,
    pub cooldown_until: Option<Instant>,

    pub awaiting_device: bool,
    pub device_expires_at: Option<Instant>,
    /// Device-code notice posted to the alt channel
    pub auth_notice: Option<MessageId>,

    pub command_queue: VecDeque<String>,
    pub last_chat_at: Option<Instant>,
    pub sending: bool,

    /// World shown to readers; seeded from the store on start
    pub world: Option<String>,
    pub world_updated_at: i64,
    /// World committed on the current connection
    pub detected: Option<String>,
    pub first_world_eligible_at: Option<Instant>,
    pub home_queued: bool,
    pub sidebar_armed: bool,
    pub current_objective: Option<String>,
    pub last_lines: Vec<String>,
    pub last_world: Option<String>,
}

impl ConnectionState {
    pub fn new(guild_id: impl Into<GuildId>, label: impl Into<String>, backoff: Duration) -> Self {
        Self {
            guild_id: guild_id.into(),
            label: label.into(),
            connection: None,
            generation: 0,
            spawned: false,
            stopped: false,
            backoff,
            cooldown_until: None,
            awaiting_device: false,
            device_expires_at: None,
            auth_notice: None,
            command_queue: VecDeque::new(),
            last_chat_at: None,
            sending: false,
            world: None,
            world_updated_at: 0,
            detected: None,
            first_world_eligible_at: None,
            home_queued: false,
            sidebar_armed: false,
            current_objective: None,
            last_lines: Vec::new(),
            last_world: None,
        }
    }

    pub fn status(&self) -> AltStatus {
        if self.connection.is_some() && self.spawned {
            AltStatus::Online
        } else if self.awaiting_device {
            AltStatus::AuthWait
        } else {
            AltStatus::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        self.status() == AltStatus::Online
    }

    /// Installs a new connection and resets everything scoped to it
    pub fn begin_connection(&mut self, connection: Arc<dyn GameConnection>) -> u64 {
        self.generation += 1;
        self.connection = Some(connection);
        self.reset_connection_scope();
        self.generation
    }

    /// Removes the live handle, returning it so the caller can end it outside the lock
    pub fn take_connection(&mut self) -> Option<Arc<dyn GameConnection>> {
        self.generation += 1;
        self.reset_connection_scope();
        self.connection.take()
    }

    fn reset_connection_scope(&mut self) {
        self.spawned = false;
        self.sending = false;
        self.detected = None;
        self.first_world_eligible_at = None;
        self.home_queued = false;
        self.sidebar_armed = false;
        self.current_objective = None;
        self.last_lines.clear();
        self.last_world = None;
    }

    /// Whether events tagged with `generation` still belong to the live connection
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.connection.is_some()
    }

    /// Raises the per-alt cooldown, never lowering it
    pub fn raise_cooldown(&mut self, until: Instant) {
        self.cooldown_until = Some(self.cooldown_until.map_or(until, |c| c.max(until)));
    }

    pub fn remaining_cooldown(&self, now: Instant) -> Duration {
        self.cooldown_until
            .map(|c| c.saturating_duration_since(now))
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionState")
            .field("guild_id", &self.guild_id)
            .field("label", &self.label)
            .field("connected", &self.connection.is_some())
            .field("generation", &self.generation)
            .field("spawned", &self.spawned)
            .field("stopped", &self.stopped)
            .field("queued_commands", &self.command_queue.len())
            .field("world", &self.world)
            .finish()
    }
}

/// Registry of every alt's state
#[derive(Debug, Default)]
pub struct StateRegistry {
    states: DashMap<AltId, SharedState>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, alt_id: AltId) -> Option<SharedState> {
        self.states.get(&alt_id).map(|s| s.value().clone())
    }

    /// Returns the alt's state, creating it on first use
    pub fn get_or_create(&self, alt_id: AltId, guild_id: &str, label: &str, backoff: Duration) -> SharedState {
        let state = self
            .states
            .entry(alt_id)
            .or_insert_with(|| Arc::new(Mutex::new(ConnectionState::new(guild_id, label, backoff))))
            .value()
            .clone();
        {
            let mut guard = state.lock();
            guard.guild_id = guild_id.to_string();
            guard.label = label.to_string();
        }
        state
    }

    pub fn remove(&self, alt_id: AltId) -> Option<SharedState> {
        self.states.remove(&alt_id).map(|(_, s)| s)
    }

    pub fn alt_ids(&self) -> Vec<AltId> {
        self.states.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Number of alts holding a live connection handle
    pub fn live_connections(&self) -> usize {
        self.states.iter().filter(|e| e.value().lock().connection.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientResult;
    use crate::client::TabMatch;
    use crate::scoreboard::ScoreboardSnapshot;
    use crate::types::PlayerIdentity;
    use async_trait::async_trait;

    struct NullConnection;

    #[async_trait]
    impl GameConnection for NullConnection {
        fn player(&self) -> Option<PlayerIdentity> {
            None
        }
        fn chat(&self, _line: &str) -> ClientResult<()> {
            Ok(())
        }
        async fn tab_complete(&self, _prefix: &str, _timeout: Duration) -> ClientResult<Vec<TabMatch>> {
            Ok(Vec::new())
        }
        fn sidebar(&self) -> Option<ScoreboardSnapshot> {
            None
        }
        fn has_open_window(&self) -> bool {
            false
        }
        fn close_window(&self) {}
        fn end(&self, _reason: &str) {}
    }

    #[test]
    fn test_new_connection_resets_connection_scope_only() {
        let mut state = ConnectionState::new("g", "Scout", Duration::from_secs(15));
        state.world = Some("Nova".into());
        state.detected = Some("Nova".into());
        state.home_queued = true;
        state.command_queue.push_back("/spawn".into());

        let generation = state.begin_connection(Arc::new(NullConnection));
        assert_eq!(generation, 1);
        assert!(state.detected.is_none());
        assert!(!state.home_queued);
        assert_eq!(state.world.as_deref(), Some("Nova"));
        assert_eq!(state.command_queue.len(), 1);
        assert!(state.is_current(1));

        assert!(state.take_connection().is_some());
        assert!(!state.is_current(1));
        assert_eq!(state.status(), AltStatus::Offline);
    }

    #[test]
    fn test_status_reflects_spawn_and_device_wait() {
        let mut state = ConnectionState::new("g", "Scout", Duration::from_secs(15));
        state.awaiting_device = true;
        assert_eq!(state.status(), AltStatus::AuthWait);

        state.begin_connection(Arc::new(NullConnection));
        assert_eq!(state.status(), AltStatus::AuthWait);

        state.spawned = true;
        assert_eq!(state.status(), AltStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_only_moves_forward() {
        let mut state = ConnectionState::new("g", "Scout", Duration::from_secs(15));
        let now = Instant::now();
        state.raise_cooldown(now + Duration::from_secs(30));
        state.raise_cooldown(now + Duration::from_secs(10));
        assert_eq!(state.remaining_cooldown(now), Duration::from_secs(30));
    }

    #[test]
    fn test_registry_creates_lazily_and_refreshes_labels() {
        let registry = StateRegistry::new();
        assert!(registry.get(1).is_none());

        registry.get_or_create(1, "g", "Old", Duration::from_secs(1));
        let state = registry.get_or_create(1, "g", "New", Duration::from_secs(1));
        assert_eq!(state.lock().label, "New");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.live_connections(), 0);

        assert!(registry.remove(1).is_some());
        assert!(registry.is_empty());
    }
}
