//! # Player Presence Tracker
//!
//! Periodically asks a guild's checker alt which players are nearby (via a
//! name-completion probe, so nothing visible is typed into chat), diffs the
//! result against the previous run and keeps a single list message up to date
//! in the configured channel. Watched players entering or leaving produce one
//! alert line each in the tracker's alerts channel.
//!
//! Two tracker kinds run side by side: `shard` and `rpost`. Both share the
//! guild's watch-list but keep separate configuration and previous-run state.

use crate::config::PresenceSettings;
use crate::error::{RunnerError, RunnerResult};
use crate::gateway::{Embed, EmbedField, Gateway, Payload};
use crate::runner::AltRunner;
use crate::store::AltStore;
use crate::types::{GuildId, MessageId, TrackerConfigPatch, TrackerKind};
use crate::watchlist;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const EMBED_COLOR: u32 = 0x5865f2;
const FIELD_MAX_LEN: usize = 1024;
const MAX_FIELDS: usize = 25;
const FALLBACK_INTERVAL_MINUTES: u64 = 5;

/// Display strings for one tracker kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerLabels {
    pub title_prefix: String,
    pub footer_text: String,
    /// How alerts refer to the tracked area
    pub area: String,
}

impl TrackerLabels {
    pub fn for_kind(kind: TrackerKind) -> Self {
        match kind {
            TrackerKind::Shard => Self {
                title_prefix: "Shard Player Tracker".into(),
                footer_text: "Factions Bot Shard Player Tracker".into(),
                area: "shard".into(),
            },
            TrackerKind::Rpost => Self {
                title_prefix: "Outpost Player Tracker".into(),
                footer_text: "Factions Bot Raiding Outpost Player Tracker".into(),
                area: "Raiding Outpost shard".into(),
            },
        }
    }
}

/// Why a run did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Ran moments ago in this process
    Debounced,
    Disabled,
    NoChannel,
    IntervalNotElapsed,
    NoCheckerAlt,
    CheckerOffline,
    ChannelMissing,
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceReport {
    pub names: Vec<String>,
    pub joined: Vec<String>,
    pub left: Vec<String>,
    pub alerts_sent: usize,
    pub message_id: MessageId,
    pub world: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PresenceOutcome {
    Skipped(SkipReason),
    Completed(PresenceReport),
}

type RunKey = (GuildId, TrackerKind);

pub struct PresenceTracker {
    runner: Arc<AltRunner>,
    store: Arc<dyn AltStore>,
    gateway: Arc<dyn Gateway>,
    settings: PresenceSettings,
    last_runs: DashMap<RunKey, Instant>,
    prev_names: DashMap<RunKey, Vec<String>>,
    prev_message: DashMap<RunKey, MessageId>,
}

impl PresenceTracker {
    pub fn new(runner: Arc<AltRunner>, store: Arc<dyn AltStore>, gateway: Arc<dyn Gateway>) -> Self {
        let settings = runner.config().presence.clone();
        Self {
            runner,
            store,
            gateway,
            settings,
            last_runs: DashMap::new(),
            prev_names: DashMap::new(),
            prev_message: DashMap::new(),
        }
    }

    /// Runs one tracker pass for a guild
    pub async fn run_once_for_guild(
        &self,
        guild_id: &str,
        kind: TrackerKind,
        labels: &TrackerLabels,
    ) -> RunnerResult<PresenceOutcome> {
        let key: RunKey = (guild_id.to_string(), kind);
        let started = Instant::now();
        let started_secs = self.runner.clock().now_secs();

        if let Some(previous) = self.last_runs.get(&key).map(|e| *e.value()) {
            if started.saturating_duration_since(previous) < self.settings.debounce() {
                return Ok(PresenceOutcome::Skipped(SkipReason::Debounced));
            }
        }
        self.last_runs.insert(key.clone(), started);

        let config = self.store.tracker_config(guild_id, kind).await?;
        if !config.enabled {
            return Ok(PresenceOutcome::Skipped(SkipReason::Disabled));
        }
        let Some(channel_id) = config.channel_id.clone() else {
            return Ok(PresenceOutcome::Skipped(SkipReason::NoChannel));
        };

        let interval_minutes = config
            .interval_minutes
            .filter(|m| *m > 0)
            .unwrap_or(if self.settings.default_interval_minutes > 0 {
                self.settings.default_interval_minutes
            } else {
                FALLBACK_INTERVAL_MINUTES
            });
        let next_allowed = i64::try_from(interval_minutes)
            .ok()
            .and_then(|minutes| minutes.checked_mul(60))
            .and_then(|secs| config.last_run_at.checked_add(secs))
            .unwrap_or(i64::MAX);
        if started_secs < next_allowed {
            return Ok(PresenceOutcome::Skipped(SkipReason::IntervalNotElapsed));
        }

        self.store
            .upsert_tracker_config(
                guild_id,
                kind,
                TrackerConfigPatch {
                    last_run_at: Some(started_secs),
                    ..Default::default()
                },
            )
            .await?;

        let Some(checker) = self.store.checker_alt(guild_id, kind).await? else {
            return Ok(PresenceOutcome::Skipped(SkipReason::NoCheckerAlt));
        };
        let connection = match self.runner.connection(checker) {
            Some(connection) if self.runner.is_online(checker) => connection,
            _ => {
                warn!("⚠️ {} tracker: no usable connection for alt {}, skipping run", kind, checker);
                return Ok(PresenceOutcome::Skipped(SkipReason::CheckerOffline));
            }
        };
        if !self.gateway.channel_exists(&channel_id).await {
            return Ok(PresenceOutcome::Skipped(SkipReason::ChannelMissing));
        }

        let names = match connection
            .tab_complete(&self.settings.probe_prefix, self.settings.probe_timeout())
            .await
        {
            Ok(matches) => filter_player_names(matches.into_iter().map(|m| m.r#match), self.settings.max_names),
            Err(e) => {
                warn!("⚠️ {} tracker: name probe failed for alt {}: {}", kind, checker, e);
                Vec::new()
            }
        };

        let previous = self.prev_names.get(&key).map(|e| e.value().clone()).unwrap_or_default();
        let (joined, left) = diff_names(&previous, &names);
        self.prev_names.insert(key.clone(), names.clone());

        let watch = watchlist::key_set(&self.store.watchlist(guild_id).await?);
        let joined_watched: Vec<&String> = joined.iter().filter(|n| watch.contains(&n.to_lowercase())).collect();
        let left_watched: Vec<&String> = left.iter().filter(|n| watch.contains(&n.to_lowercase())).collect();

        let mut alerts_sent = 0;
        if !joined_watched.is_empty() || !left_watched.is_empty() {
            match self.gateway.ensure_alerts_channel(guild_id, kind).await {
                Some(alerts) => {
                    let lines = joined_watched
                        .iter()
                        .map(|n| joined_alert(n, &labels.area))
                        .chain(left_watched.iter().map(|n| left_alert(n, &labels.area)));
                    for line in lines {
                        match self.gateway.send_message(&alerts, Payload::text(line)).await {
                            Ok(_) => alerts_sent += 1,
                            Err(e) => warn!("⚠️ {} tracker: alert send failed: {}", kind, e),
                        }
                    }
                }
                None => warn!("⚠️ {} tracker: no alerts channel for guild {}", kind, guild_id),
            }
        }

        let world = self.runner.alt_world(checker).unwrap_or_else(|| "Unknown".to_string());
        let payload = Payload::embed(presence_embed(labels, &names, &world, self.runner.clock().now_secs()));

        let previous_id = config
            .previous_message_id
            .clone()
            .or_else(|| self.prev_message.get(&key).map(|e| e.value().clone()));
        let message_id = self.publish(&channel_id, previous_id, payload).await?;

        self.prev_message.insert(key, message_id.clone());
        if let Err(e) = self
            .store
            .upsert_tracker_config(
                guild_id,
                kind,
                TrackerConfigPatch {
                    previous_message_id: Some(message_id.clone()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!("⚠️ {} tracker: failed to remember message id: {}", kind, e);
        }

        info!(
            "👥 {} tracker for guild {}: {} players in {} (+{} / -{}, {} alerts)",
            kind,
            guild_id,
            names.len(),
            world,
            joined.len(),
            left.len(),
            alerts_sent
        );
        Ok(PresenceOutcome::Completed(PresenceReport {
            names,
            joined,
            left,
            alerts_sent,
            message_id,
            world,
        }))
    }

    /// Edits the previous list message in place, replacing it when that fails
    async fn publish(&self, channel_id: &str, previous: Option<MessageId>, payload: Payload) -> RunnerResult<MessageId> {
        if let Some(previous) = previous {
            match self.gateway.edit_message(channel_id, &previous, payload.clone()).await {
                Ok(()) => return Ok(previous),
                Err(e) => {
                    debug!("Edit of {} failed ({}), sending a new message", previous, e);
                    if let Err(e) = self.gateway.delete_message(channel_id, &previous).await {
                        debug!("Delete of {} failed: {}", previous, e);
                    }
                }
            }
        }
        self.gateway
            .send_message(channel_id, payload)
            .await
            .map_err(RunnerError::from)
    }

    /// Runs both tracker kinds for every guild on a fixed tick, forever
    pub async fn run_schedule(self: Arc<Self>, guilds: Vec<GuildId>) {
        let mut ticker = interval(self.settings.schedule_tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("⏰ Presence schedule started for {} guilds", guilds.len());

        loop {
            ticker.tick().await;
            for guild_id in &guilds {
                for kind in TrackerKind::ALL {
                    let labels = TrackerLabels::for_kind(kind);
                    match self.run_once_for_guild(guild_id, kind, &labels).await {
                        Ok(PresenceOutcome::Skipped(reason)) => {
                            debug!("{} tracker for guild {} skipped: {:?}", kind, guild_id, reason)
                        }
                        Ok(PresenceOutcome::Completed(_)) => {}
                        Err(e) => warn!("⚠️ {} tracker for guild {} failed: {}", kind, guild_id, e),
                    }
                }
            }
        }
    }
}

fn is_player_name(name: &str) -> bool {
    (3..=16).contains(&name.len()) && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Keeps valid player names in first-seen order, without exact duplicates
pub fn filter_player_names<I>(matches: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    matches
        .into_iter()
        .map(|m| m.trim().to_string())
        .filter(|n| is_player_name(n))
        .filter(|n| seen.insert(n.clone()))
        .take(limit)
        .collect()
}

/// Case-insensitive `(joined, left)` between two runs
pub fn diff_names(previous: &[String], current: &[String]) -> (Vec<String>, Vec<String>) {
    let prev: HashSet<String> = previous.iter().map(|n| n.to_lowercase()).collect();
    let curr: HashSet<String> = current.iter().map(|n| n.to_lowercase()).collect();
    let joined = current.iter().filter(|n| !prev.contains(&n.to_lowercase())).cloned().collect();
    let left = previous.iter().filter(|n| !curr.contains(&n.to_lowercase())).cloned().collect();
    (joined, left)
}

/// Bullet lines packed into chunks of at most `max_len` characters
pub fn bullet_chunks(names: &[String], max_len: usize) -> Vec<String> {
    if names.is_empty() {
        return vec!["_None_".to_string()];
    }
    let mut chunks = Vec::new();
    let mut buf = String::new();
    for name in names {
        let line = format!("• {}", name);
        let separator = if buf.is_empty() { 0 } else { 1 };
        if !buf.is_empty() && buf.chars().count() + separator + line.chars().count() > max_len {
            chunks.push(std::mem::take(&mut buf));
        }
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(&line);
    }
    if !buf.is_empty() {
        chunks.push(buf);
    }
    chunks
}

fn presence_embed(labels: &TrackerLabels, names: &[String], world: &str, now_secs: i64) -> Embed {
    let total = names.len();
    let fields = bullet_chunks(names, FIELD_MAX_LEN)
        .into_iter()
        .take(MAX_FIELDS)
        .enumerate()
        .map(|(i, value)| EmbedField {
            name: if i == 0 {
                format!("Players ({})", total)
            } else {
                "Players (cont.)".to_string()
            },
            value,
        })
        .collect();

    Embed {
        title: format!(
            "{} - {} Player{} in {}",
            labels.title_prefix,
            total,
            if total == 1 { "" } else { "s" },
            world
        ),
        description: None,
        color: Some(EMBED_COLOR),
        fields,
        footer: Some(format!("{} • Last update: <t:{}:t>", labels.footer_text, now_secs)),
        link: None,
    }
}

fn joined_alert(name: &str, area: &str) -> String {
    format!("🔴 **{}** has **entered** the {}, keep an eye out.", name, area)
}

fn left_alert(name: &str, area: &str) -> String {
    format!("🟢 **{}** has **left** the {}, what a good boy.", name, area)
}
