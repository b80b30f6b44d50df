//! Current-world inference from the sidebar scoreboard.
//!
//! Capture is armed once the startup command has been sent; before that only
//! explicitly armed reads are evaluated. The first world on a connection is
//! only committed after the eligibility window opens, which keeps the lobby
//! sidebar from being reported as the alt's world.

use crate::client::ScoreboardUpdate;
use crate::client::ScoreboardCause;
use crate::events::{RunnerEvent, WorldChanged};
use crate::gateway::{Embed, Payload};
use crate::runner::AltRunner;
use crate::scoreboard::{lines_from_snapshot, DisplaySlot, ScoreboardSnapshot};
use crate::timers::TaskKind;
use crate::types::AltId;
use regex::RegexSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const WORLD_ANNOUNCE_COLOR: u32 = 0x57f287;

fn transition_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RegexSet::new([
            r"(?i)teleport",
            r"(?i)home",
            r"(?i)moved you",
            r"(?i)you (?:were|have been) (?:teleported|moved)",
            r"(?i)now entering",
        ])
        .unwrap_or_else(|_| RegexSet::empty())
    })
}

/// Chat lines that usually accompany a world change
pub fn is_transition_message(text: &str) -> bool {
    transition_patterns().is_match(text)
}

impl AltRunner {
    pub(crate) async fn handle_scoreboard(&self, alt_id: AltId, update: ScoreboardUpdate) {
        let Some(state) = self.registry.get(alt_id) else {
            return;
        };
        let objective = update.objective;
        let relevant = {
            let mut s = state.lock();
            match update.cause {
                ScoreboardCause::Created | ScoreboardCause::Position => {
                    if objective.slot == Some(DisplaySlot::Sidebar) {
                        s.current_objective = Some(objective.name.clone());
                        true
                    } else {
                        false
                    }
                }
                _ => s.current_objective.as_deref() == Some(objective.name.as_str()),
            }
        };

        if relevant {
            self.compute_world(alt_id, update.cause.as_str(), &objective).await;
        }
    }

    /// Reads the connection's sidebar directly and evaluates it
    pub(crate) async fn read_sidebar(&self, alt_id: AltId, why: &str) {
        let Some(connection) = self.connection(alt_id) else {
            return;
        };
        let Some(sidebar) = connection.sidebar() else {
            debug!("Alt {} has no sidebar yet ({})", alt_id, why);
            return;
        };
        if let Some(state) = self.registry.get(alt_id) {
            state.lock().current_objective = Some(sidebar.name.clone());
        }
        self.compute_world(alt_id, why, &sidebar).await;
    }

    /// Schedules a one-shot sidebar read
    pub(crate) fn schedule_probe(self: &Arc<Self>, alt_id: AltId, delay: Duration, kind: TaskKind, reason: &'static str) {
        let weak = Arc::downgrade(self);
        self.scheduler.spawn_after(alt_id, kind, delay, async move {
            let Some(runner) = weak.upgrade() else {
                return;
            };
            if kind == TaskKind::InitialScan {
                runner.read_sidebar(alt_id, reason).await;
            } else if runner.is_online(alt_id) {
                runner.read_sidebar(alt_id, &format!("probe:{}", reason)).await;
            }
        });
    }

    fn start_world_poller(self: &Arc<Self>, alt_id: AltId) {
        let period = self.config.world.poll_interval();
        let weak = Arc::downgrade(self);
        self.scheduler.spawn_every(alt_id, TaskKind::Poll, period, move || {
            let weak = weak.clone();
            async move {
                if let Some(runner) = weak.upgrade() {
                    if runner.is_online(alt_id) {
                        debug!("Alt {} world poll tick", alt_id);
                        runner.read_sidebar(alt_id, "poll").await;
                    }
                }
            }
        });
        info!("🛰️ Alt {} world poller started ({} ms)", alt_id, period.as_millis());
    }

    pub(crate) async fn compute_world(&self, alt_id: AltId, why: &str, snapshot: &ScoreboardSnapshot) {
        let Some(state) = self.registry.get(alt_id) else {
            return;
        };
        if !state.lock().sidebar_armed && !why.starts_with("armed") {
            return;
        }

        let lines = lines_from_snapshot(snapshot);
        let world = self.filter.guess_world(&lines);

        let (changed_lines, changed_world, label) = {
            let s = state.lock();
            (
                s.last_lines != lines,
                world.is_some() && world != s.last_world,
                s.label.clone(),
            )
        };
        let always = why.starts_with("poll") || why.starts_with("probe") || why.starts_with("armed");
        if changed_lines || changed_world || always {
            debug!(
                "📋 {} ({}) title={:?} lines={:?} world={:?}",
                label, why, snapshot.title, lines, world
            );
        }

        if let Some(world) = &world {
            self.commit_if_changed(alt_id, world, why).await;
        }

        let mut s = state.lock();
        if world.is_some() {
            s.last_world = world;
        }
        s.last_lines = lines;
    }

    async fn commit_if_changed(&self, alt_id: AltId, world: &str, why: &str) {
        let Some(state) = self.registry.get(alt_id) else {
            return;
        };
        let now_secs = self.clock.now_secs();

        let committed = {
            let mut s = state.lock();
            if s.detected.as_deref() == Some(world) {
                return;
            }
            if s.detected.is_none() {
                if let Some(eligible_at) = s.first_world_eligible_at {
                    if Instant::now() < eligible_at {
                        debug!("Alt {} ignored {:?}, too early ({})", alt_id, world, why);
                        return;
                    }
                }
            }

            let first = s.detected.is_none();
            s.detected = Some(world.to_string());
            s.world = Some(world.to_string());
            s.world_updated_at = now_secs;

            let queued_home = if !s.home_queued {
                s.home_queued = true;
                s.command_queue.push_back(self.config.connection.home_command.clone());
                true
            } else {
                false
            };
            (first, queued_home, s.guild_id.clone(), s.label.clone(), s.is_online())
        };
        let (first, queued_home, guild_id, label, online) = committed;

        info!("🧭 Alt {} world -> {:?} ({})", alt_id, world, why);
        if !self.config.world.is_known(world) {
            debug!("Alt {} world {:?} is not in the known list", alt_id, world);
        }

        if let Err(e) = self.store.set_world(alt_id, world, now_secs).await {
            warn!("⚠️ Failed to persist world for alt {}: {}", alt_id, e);
        }

        if first && self.config.world.announce_first_world {
            let notice = Payload::embed(Embed {
                title: "🧭 Alt shard detected".into(),
                description: Some(format!("**{}** is on **{}**", label, world)),
                color: Some(WORLD_ANNOUNCE_COLOR),
                ..Default::default()
            });
            self.notify(&guild_id, notice).await;
        }

        self.events.emit(RunnerEvent::WorldChanged(WorldChanged {
            guild_id,
            alt_id,
            label,
            world: world.to_string(),
        }));

        let Some(runner) = self.self_arc() else {
            return;
        };
        if !self.scheduler.is_scheduled(alt_id, TaskKind::Poll) && self.connection(alt_id).is_some() {
            runner.start_world_poller(alt_id);
        }
        if queued_home {
            debug!("Alt {} queued home command after first world", alt_id);
        }
        if online {
            runner.kick_drain(alt_id);
        }
    }
}
