//! Shared domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a supervised alt (store primary key)
pub type AltId = i64;

/// Chat-platform guild snowflake
pub type GuildId = String;

/// Chat-platform channel snowflake
pub type ChannelId = String;

/// Chat-platform message snowflake
pub type MessageId = String;

/// How an alt proves its identity to the game server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Username only, no external authentication
    #[default]
    Offline,
    /// Out-of-band device-code flow confirmed by a human operator
    DeviceCode,
}

/// Status persisted on the alt record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersistedStatus {
    Online,
    Offline,
    AuthWait,
    Error,
}

impl fmt::Display for PersistedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PersistedStatus::Online => "online",
            PersistedStatus::Offline => "offline",
            PersistedStatus::AuthWait => "auth-wait",
            PersistedStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Live status as seen by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AltStatus {
    Offline,
    AuthWait,
    Online,
}

impl fmt::Display for AltStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AltStatus::Offline => "offline",
            AltStatus::AuthWait => "auth-wait",
            AltStatus::Online => "online",
        };
        f.write_str(s)
    }
}

/// In-game identity reported once the alt has spawned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerIdentity {
    pub uuid: Option<String>,
    pub username: String,
}

/// Persisted alt record as handed out by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AltRecord {
    pub id: AltId,
    pub guild_id: GuildId,
    pub label: String,
    #[serde(default)]
    pub auth_mode: AuthMode,
    /// Username for offline alts, account hint for device-code alts
    #[serde(default)]
    pub login_hint: Option<String>,
    /// Opaque encrypted credential blob owned by the persistence layer
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default)]
    pub identity: Option<PlayerIdentity>,
    #[serde(default)]
    pub last_world: Option<String>,
    #[serde(default)]
    pub world_updated_at: i64,
    #[serde(default)]
    pub last_status: Option<PersistedStatus>,
    #[serde(default)]
    pub last_seen: i64,
}

impl AltRecord {
    pub fn new(id: AltId, guild_id: impl Into<GuildId>, label: impl Into<String>) -> Self {
        Self {
            id,
            guild_id: guild_id.into(),
            label: label.into(),
            auth_mode: AuthMode::Offline,
            login_hint: None,
            credentials: None,
            identity: None,
            last_world: None,
            world_updated_at: 0,
            last_status: None,
            last_seen: 0,
        }
    }

    pub fn with_auth_mode(mut self, auth_mode: AuthMode) -> Self {
        self.auth_mode = auth_mode;
        self
    }

    pub fn with_login_hint(mut self, hint: impl Into<String>) -> Self {
        self.login_hint = Some(hint.into());
        self
    }

    /// Username presented to the game server on connect
    pub fn connect_username(&self) -> String {
        let fallback = || format!("alt-{}", self.id);
        match self.auth_mode {
            AuthMode::Offline => self
                .identity
                .as_ref()
                .map(|i| i.username.clone())
                .or_else(|| self.login_hint.clone())
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| non_empty_or(&self.label, fallback)),
            AuthMode::DeviceCode => self
                .login_hint
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| non_empty_or(&self.label, fallback)),
        }
        .trim()
        .to_string()
    }
}

fn non_empty_or(s: &str, fallback: impl FnOnce() -> String) -> String {
    if s.trim().is_empty() {
        fallback()
    } else {
        s.to_string()
    }
}

/// Which presence tracker a run belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackerKind {
    /// Main shard tracker
    Shard,
    /// Raiding-outpost tracker
    Rpost,
}

impl TrackerKind {
    pub const ALL: [TrackerKind; 2] = [TrackerKind::Shard, TrackerKind::Rpost];

    /// Name of the auto-created alerts channel
    pub fn alerts_channel_name(self) -> &'static str {
        match self {
            TrackerKind::Shard => "shard-player-alerts",
            TrackerKind::Rpost => "rpost-player-alerts",
        }
    }
}

impl fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerKind::Shard => f.write_str("shard"),
            TrackerKind::Rpost => f.write_str("rpost"),
        }
    }
}

/// Persisted tracker configuration for one guild and kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TrackerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    #[serde(default)]
    pub interval_minutes: Option<u64>,
    #[serde(default)]
    pub last_run_at: i64,
    #[serde(default)]
    pub previous_message_id: Option<MessageId>,
}

/// Partial update applied by `AltStore::upsert_tracker_config`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerConfigPatch {
    pub enabled: Option<bool>,
    pub channel_id: Option<ChannelId>,
    pub interval_minutes: Option<u64>,
    pub last_run_at: Option<i64>,
    pub previous_message_id: Option<MessageId>,
}

impl TrackerConfigPatch {
    pub fn apply(&self, config: &mut TrackerConfig) {
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(channel_id) = &self.channel_id {
            config.channel_id = Some(channel_id.clone());
        }
        if let Some(interval) = self.interval_minutes {
            config.interval_minutes = Some(interval);
        }
        if let Some(last_run_at) = self.last_run_at {
            config.last_run_at = last_run_at;
        }
        if let Some(message_id) = &self.previous_message_id {
            config.previous_message_id = Some(message_id.clone());
        }
    }
}
