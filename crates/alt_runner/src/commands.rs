//! Per-alt command queue.
//!
//! Lines are sent strictly in FIFO order by a single drain task per alt, with
//! at least the configured chat gap between consecutive sends on the same
//! connection. Any open container window is closed first, since the server
//! ignores chat while one is open.

use crate::runner::AltRunner;
use crate::timers::TaskKind;
use crate::types::AltId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

const WINDOW_CLOSE_ATTEMPTS: usize = 2;
const WINDOW_CLOSE_PAUSE: Duration = Duration::from_millis(150);

/// Trims a command line and makes sure it starts with `/`
pub fn normalize_command(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('/') {
        Some(trimmed.to_string())
    } else {
        Some(format!("/{}", trimmed))
    }
}

impl AltRunner {
    /// Starts the drain task unless one is already running or the alt is offline
    pub(crate) fn kick_drain(self: &Arc<Self>, alt_id: AltId) {
        let Some(state) = self.registry.get(alt_id) else {
            return;
        };
        let generation = {
            let mut s = state.lock();
            if !s.is_online() || s.sending {
                return;
            }
            s.sending = true;
            s.generation
        };

        let weak = Arc::downgrade(self);
        self.scheduler.spawn(alt_id, TaskKind::Drain, async move {
            loop {
                let Some(runner) = weak.upgrade() else {
                    return;
                };
                if !runner.drain_one(alt_id, generation).await {
                    return;
                }
            }
        });
    }

    /// Sends the next queued line. Returns `false` once the queue is empty or
    /// the connection is gone.
    async fn drain_one(&self, alt_id: AltId, generation: u64) -> bool {
        let Some(state) = self.registry.get(alt_id) else {
            return false;
        };
        let next = {
            let mut s = state.lock();
            if !s.is_current(generation) {
                return false;
            }
            match s.command_queue.pop_front() {
                Some(line) => s.connection.clone().map(|c| (line, c, s.last_chat_at)),
                None => {
                    s.sending = false;
                    None
                }
            }
        };
        let Some((line, connection, last_chat_at)) = next else {
            return false;
        };

        for _ in 0..WINDOW_CLOSE_ATTEMPTS {
            if !connection.has_open_window() {
                break;
            }
            debug!("Alt {} closing an open window before chat", alt_id);
            connection.close_window();
            sleep(WINDOW_CLOSE_PAUSE).await;
        }

        // Other senders (the startup command) may move the mark while we wait
        let gap = self.config.chat.min_gap();
        let mut last_chat_at = last_chat_at;
        while let Some(last) = last_chat_at {
            if Instant::now() >= last + gap {
                break;
            }
            sleep_until(last + gap).await;
            last_chat_at = state.lock().last_chat_at;
        }

        if !self.is_current(alt_id, generation) {
            // Connection went away while waiting; keep the line for the next one
            let mut s = state.lock();
            if !s.stopped {
                s.command_queue.push_front(line);
            }
            return false;
        }

        match connection.chat(&line) {
            Ok(()) => info!("💬 Alt {} -> {}", alt_id, line),
            Err(e) => warn!("⚠️ Alt {} chat failed for {:?}: {}", alt_id, line, e),
        }
        state.lock().last_chat_at = Some(Instant::now());
        true
    }

    /// Number of commands waiting to be sent
    pub fn queued_commands(&self, alt_id: AltId) -> usize {
        self.registry
            .get(alt_id)
            .map(|s| s.lock().command_queue.len())
            .unwrap_or(0)
    }
}
