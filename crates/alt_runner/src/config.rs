//! Runner configuration.
//!
//! Every knob the runner and presence tracker read lives here. All fields are
//! serde-defaulted so a partial TOML/JSON section is enough to override a single
//! value, and `validate()` reports the first inconsistent setting it finds.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level runner configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RunnerConfig {
    /// Game server endpoint
    #[serde(default)]
    pub server: ServerSettings,
    /// Connection lifecycle and reconnect policy
    #[serde(default)]
    pub connection: ConnectionSettings,
    /// Global login throttling
    #[serde(default)]
    pub login: LoginSettings,
    /// Outgoing chat pacing
    #[serde(default)]
    pub chat: ChatSettings,
    /// Scoreboard world inference
    #[serde(default)]
    pub world: WorldSettings,
    /// Player presence tracker
    #[serde(default)]
    pub presence: PresenceSettings,
}

/// Game server endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Protocol version string handed to the game client
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_host() -> String {
    "hub.mc-complex.com".to_string()
}

fn default_port() -> u16 {
    25565
}

fn default_version() -> String {
    "1.20".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            version: default_version(),
        }
    }
}

/// Reconnect backoff policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// Always wait the minimum interval
    #[default]
    Fixed,
    /// Multiply by 1.5 per consecutive failure, clamped to `[min, max]`
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSettings {
    /// Sent once after spawn; empty or `none` disables it
    #[serde(default = "default_startup_command")]
    pub startup_command: String,
    /// Queued once per connection after the first world is detected
    #[serde(default = "default_home_command")]
    pub home_command: String,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_min_ms: u64,
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default)]
    pub backoff: BackoffPolicy,
    /// Delay between spawn and the startup command
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,
    /// Per-alt game client profile directories are created under this root
    #[serde(default = "default_profiles_root")]
    pub profiles_root: PathBuf,
}

fn default_startup_command() -> String {
    "/factions".to_string()
}

fn default_home_command() -> String {
    "/home home".to_string()
}

fn default_true() -> bool {
    true
}

fn default_reconnect_ms() -> u64 {
    15_000
}

fn default_settle_delay_ms() -> u64 {
    5_600
}

fn default_check_timeout_ms() -> u64 {
    120_000
}

fn default_profiles_root() -> PathBuf {
    PathBuf::from("data/profiles")
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            startup_command: default_startup_command(),
            home_command: default_home_command(),
            auto_reconnect: true,
            reconnect_min_ms: default_reconnect_ms(),
            reconnect_max_ms: default_reconnect_ms(),
            backoff: BackoffPolicy::default(),
            settle_delay_ms: default_settle_delay_ms(),
            check_timeout_ms: default_check_timeout_ms(),
            profiles_root: default_profiles_root(),
        }
    }
}

impl ConnectionSettings {
    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Startup command, or `None` when disabled
    pub fn startup_command(&self) -> Option<&str> {
        let cmd = self.startup_command.trim();
        if cmd.is_empty() || cmd.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(cmd)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoginSettings {
    /// Upper bound of the random delay added after each attempt
    #[serde(default = "default_login_jitter_ms")]
    pub jitter_ms: u64,
    /// Fixed minimum gap between two login attempts
    #[serde(default = "default_login_gap_ms")]
    pub min_gap_ms: u64,
    /// Registration cooldown raised by "logging in too fast"
    #[serde(default = "default_login_gap_ms")]
    pub throttle_cooldown_ms: u64,
}

fn default_login_jitter_ms() -> u64 {
    1_500
}

fn default_login_gap_ms() -> u64 {
    15_000
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            jitter_ms: default_login_jitter_ms(),
            min_gap_ms: default_login_gap_ms(),
            throttle_cooldown_ms: default_login_gap_ms(),
        }
    }
}

impl LoginSettings {
    pub fn min_gap(&self) -> Duration {
        Duration::from_millis(self.min_gap_ms)
    }

    pub fn throttle_cooldown(&self) -> Duration {
        Duration::from_millis(self.throttle_cooldown_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSettings {
    /// Minimum spacing between two outgoing lines of one alt
    #[serde(default = "default_chat_gap_ms")]
    pub min_gap_ms: u64,
}

fn default_chat_gap_ms() -> u64 {
    900
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self { min_gap_ms: default_chat_gap_ms() }
    }
}

impl ChatSettings {
    pub fn min_gap(&self) -> Duration {
        Duration::from_millis(self.min_gap_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldSettings {
    /// Delay after the startup command before inferred worlds are trusted
    #[serde(default = "default_first_world_delay_ms")]
    pub first_world_delay_ms: u64,
    /// Bound on the post-spawn wait for a first world
    #[serde(default = "default_first_world_timeout_ms")]
    pub first_world_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Advisory only; unknown worlds are still accepted
    #[serde(default = "default_known_worlds")]
    pub known_worlds: Vec<String>,
    /// Case-insensitive regexes matched against normalized sidebar lines
    #[serde(default = "default_deny_patterns")]
    pub deny_patterns: Vec<String>,
    #[serde(default)]
    pub announce_first_world: bool,
    /// Dump every sidebar line at debug level
    #[serde(default)]
    pub debug_lines: bool,
}

fn default_first_world_delay_ms() -> u64 {
    8_000
}

fn default_first_world_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    60_000
}

fn default_known_worlds() -> Vec<String> {
    ["Spawn", "Meteor", "Nebula", "Comet", "Nova", "Luna", "Star", "Raiding Outpost"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Keyword deny-list applied to normalized sidebar text
pub fn default_deny_patterns() -> Vec<String> {
    [
        r"season",
        r"server",
        r"balance",
        r"experience",
        r"xp\b",
        r"k/d",
        r"fly\s*time",
        r"power",
        r"online\b",
        r"shield",
        r"faction",
        r"member",
        r"claim",
        r"claimed",
        r"money",
        r"coins",
        r"vote",
        r"store",
        r"discord",
        r"website",
        r"hub\b",
        r"mc-?complex",
        r"\.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            first_world_delay_ms: default_first_world_delay_ms(),
            first_world_timeout_ms: default_first_world_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            known_worlds: default_known_worlds(),
            deny_patterns: default_deny_patterns(),
            announce_first_world: false,
            debug_lines: false,
        }
    }
}

impl WorldSettings {
    pub fn first_world_delay(&self) -> Duration {
        Duration::from_millis(self.first_world_delay_ms)
    }

    pub fn first_world_timeout(&self) -> Duration {
        Duration::from_millis(self.first_world_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn is_known(&self, world: &str) -> bool {
        self.known_worlds.iter().any(|w| w.eq_ignore_ascii_case(world.trim()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceSettings {
    /// Name-completion prefix used for the probe
    #[serde(default = "default_probe_prefix")]
    pub probe_prefix: String,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_max_names")]
    pub max_names: usize,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Used when a tracker record carries no interval
    #[serde(default = "default_interval_minutes")]
    pub default_interval_minutes: u64,
    #[serde(default = "default_schedule_tick_ms")]
    pub schedule_tick_ms: u64,
}

fn default_probe_prefix() -> String {
    "/a ".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_max_names() -> usize {
    80
}

fn default_debounce_ms() -> u64 {
    2_000
}

fn default_interval_minutes() -> u64 {
    5
}

fn default_schedule_tick_ms() -> u64 {
    10_000
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            probe_prefix: default_probe_prefix(),
            probe_timeout_ms: default_probe_timeout_ms(),
            max_names: default_max_names(),
            debounce_ms: default_debounce_ms(),
            default_interval_minutes: default_interval_minutes(),
            schedule_tick_ms: default_schedule_tick_ms(),
        }
    }
}

impl PresenceSettings {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn schedule_tick(&self) -> Duration {
        Duration::from_millis(self.schedule_tick_ms)
    }
}

impl RunnerConfig {
    /// Check the configuration for values the runner cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(invalid("server.host", "must not be empty"));
        }
        if self.server.port == 0 {
            return Err(invalid("server.port", "must be non-zero"));
        }
        if self.connection.reconnect_min_ms == 0 {
            return Err(invalid("connection.reconnect_min_ms", "must be greater than 0"));
        }
        if self.connection.reconnect_max_ms < self.connection.reconnect_min_ms {
            return Err(invalid(
                "connection.reconnect_max_ms",
                format!(
                    "{} is below reconnect_min_ms ({})",
                    self.connection.reconnect_max_ms, self.connection.reconnect_min_ms
                ),
            ));
        }
        if self.connection.home_command.trim().is_empty() {
            return Err(invalid("connection.home_command", "must not be empty"));
        }
        if self.world.poll_interval_ms == 0 {
            return Err(invalid("world.poll_interval_ms", "must be greater than 0"));
        }
        if self.presence.probe_prefix.is_empty() {
            return Err(invalid("presence.probe_prefix", "must not be empty"));
        }
        if self.presence.max_names == 0 {
            return Err(invalid("presence.max_names", "must be greater than 0"));
        }
        if self.presence.schedule_tick_ms == 0 {
            return Err(invalid("presence.schedule_tick_ms", "must be greater than 0"));
        }

        // Surface bad regexes at load time rather than on the first scoreboard read
        crate::scoreboard::WorldFilter::new(&self.world.deny_patterns)?;

        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue { field, reason: reason.into() }
}
