//! Reconnect policy and rate-limit handling.

use crate::config::BackoffPolicy;
use crate::gateway::{Embed, Payload};
use crate::login::jitter_between;
use crate::runner::AltRunner;
use crate::timers::TaskKind;
use crate::types::AltId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const NETWORK_LIMIT_COLOR: u32 = 0xf1c40f;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisconnectKind {
    Kicked,
    Ended,
}

/// Rate-limit signals recognised in kick and disconnect reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitSignal {
    /// "logging in too fast": slow down all logins
    LoginThrottle,
    /// The proxy refused to register a new connection
    NetworkRegistration,
}

/// Classifies a kick or disconnect reason
pub fn classify_disconnect(reason: &str) -> Option<RateLimitSignal> {
    let lowered = reason.to_lowercase();
    if lowered.contains("logging in too fast") {
        Some(RateLimitSignal::LoginThrottle)
    } else if lowered.contains("unable to register you with the network") {
        Some(RateLimitSignal::NetworkRegistration)
    } else {
        None
    }
}

/// Backoff to use after the next failure
pub fn next_backoff(policy: BackoffPolicy, current: Duration, min: Duration, max: Duration) -> Duration {
    match policy {
        BackoffPolicy::Fixed => min,
        BackoffPolicy::Exponential => {
            let grown = Duration::from_millis((current.as_millis() as f64 * 1.5).round() as u64);
            grown.clamp(min, max)
        }
    }
}

/// Delay before the next attempt: the backoff, stretched to cover any cooldown
pub fn reconnect_delay(backoff: Duration, cooldown_remaining: Duration) -> Duration {
    backoff.max(cooldown_remaining)
}

impl AltRunner {
    /// Schedules a login retry unless the alt is stopped or waiting on auth
    pub(crate) fn schedule_reconnect(self: &Arc<Self>, alt_id: AltId) {
        let settings = &self.config.connection;
        if !settings.auto_reconnect {
            debug!("Auto reconnect disabled, alt {} stays offline", alt_id);
            return;
        }
        let Some(state) = self.registry.get(alt_id) else {
            return;
        };

        let now = Instant::now();
        let global = self
            .login
            .cooldowns()
            .global()
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default();

        let delay = {
            let mut s = state.lock();
            if s.stopped || s.awaiting_device {
                debug!(
                    "Alt {} not rescheduled (stopped={}, awaiting_device={})",
                    alt_id, s.stopped, s.awaiting_device
                );
                return;
            }
            let cooldown = s.remaining_cooldown(now).max(global);
            let delay = reconnect_delay(s.backoff, cooldown);
            s.backoff = next_backoff(
                settings.backoff,
                s.backoff,
                settings.reconnect_min(),
                settings.reconnect_max(),
            );
            delay
        } + jitter_between(0, self.config.login.jitter_ms);

        info!("🔁 Alt {} reconnecting in {} ms", alt_id, delay.as_millis());
        let login = self.login.clone();
        self.scheduler.spawn_after(alt_id, TaskKind::Reconnect, delay, async move {
            let outcome = login.enqueue_login(alt_id).await;
            debug!("Alt {} reconnect attempt: {:?}", alt_id, outcome);
        });
    }

    /// Raises cooldowns for a rate-limited disconnect reason
    pub(crate) async fn apply_rate_limit(&self, alt_id: AltId, guild_id: &str, label: &str, reason: &str) {
        let Some(signal) = classify_disconnect(reason) else {
            return;
        };
        let now = Instant::now();
        let cooldowns = self.login.cooldowns();

        match signal {
            RateLimitSignal::LoginThrottle => {
                let cooldown = self.config.login.throttle_cooldown();
                warn!("🐢 Login throttled, pausing logins for {} ms", cooldown.as_millis());
                cooldowns.raise_registration(now + cooldown);
            }
            RateLimitSignal::NetworkRegistration => {
                let until = now + self.config.connection.reconnect_min();
                warn!("⏳ Network refused registration for alt {}", alt_id);
                cooldowns.raise_network(until);
                cooldowns.raise_registration(until);
                if let Some(state) = self.registry.get(alt_id) {
                    state.lock().raise_cooldown(until);
                }
                self.notify(guild_id, network_limit_notice(label)).await;
            }
        }
    }
}

fn network_limit_notice(label: &str) -> Payload {
    Payload::embed(Embed {
        title: "⏳ Network is rate-limiting new connections".into(),
        description: Some(format!("**{}** hit a network limit; will retry shortly.", label)),
        color: Some(NETWORK_LIMIT_COLOR),
        ..Default::default()
    })
}
