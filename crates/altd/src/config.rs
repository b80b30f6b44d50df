//! Configuration management for the alt daemon.
//!
//! The TOML file embeds the library's [`RunnerConfig`] under `[runner]` and
//! adds the host-process sections: storage, logging, auto-start guilds and the
//! simulated game server used in place of a protocol client.

use alt_runner::{AltId, GuildId, RunnerConfig};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Application configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Guilds whose alts are started at boot and whose trackers are scheduled
    #[serde(default)]
    pub guilds: Vec<GuildId>,
    #[serde(default)]
    pub simulation: SimulationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// JSON file holding alts, tracker settings and watch-lists
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
}

fn default_data_file() -> PathBuf {
    PathBuf::from("altd-data.json")
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
        }
    }
}

/// Logging system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

/// One alt seeded into the store when it is missing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedAlt {
    pub id: AltId,
    pub guild_id: GuildId,
    pub label: String,
}

/// The in-process game server the daemon connects its alts to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Sidebar lines shown to every connection
    #[serde(default)]
    pub sidebar_lines: Vec<String>,
    /// Names returned by the presence probe
    #[serde(default)]
    pub players: Vec<String>,
    #[serde(default)]
    pub alts: Vec<SeedAlt>,
}

impl AppConfig {
    /// Loads configuration from a TOML file, writing the defaults when the
    /// file does not exist yet.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        self.runner.validate()?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.storage.data_file.as_os_str().is_empty() {
            return Err(anyhow!("Data file path cannot be empty"));
        }

        if let Some(guild) = self.guilds.iter().find(|g| g.trim().is_empty()) {
            return Err(anyhow!("Guild ids cannot be blank: {:?}", guild));
        }

        let mut ids: Vec<AltId> = self.simulation.alts.iter().map(|a| a.id).collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(anyhow!("Duplicate simulated alt id: {}", pair[0]));
        }

        Ok(())
    }
}
