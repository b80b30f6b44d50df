//! # Alt Runner
//!
//! Supervision of long-lived, unattended game-client connections ("alts") on
//! behalf of chat-platform guilds, plus a player presence tracker built on top
//! of them.
//!
//! ## Core Features
//!
//! - **Connection supervision**: at most one live connection per alt, with
//!   automatic reconnect, rate-limit cooldowns and device-code sign-in.
//! - **Serialized logins**: a single global queue spaces connection attempts
//!   so the upstream network never sees a burst of logins.
//! - **World inference**: the alt's current world is read from the sidebar
//!   scoreboard, persisted and published as [`RunnerEvent::WorldChanged`].
//! - **Command queue**: per-alt FIFO of chat commands with a minimum gap.
//! - **Presence tracking**: periodic nearby-player lists with watch-list
//!   alerts on joins and leaves.
//!
//! ## Architecture Overview
//!
//! The runner talks to the outside world through three seams:
//!
//! - [`GameClient`] / [`GameConnection`] for the game protocol
//! - [`AltStore`] for persistent alt, tracker and watch-list records
//! - [`Gateway`] for operator notices and tracker output
//!
//! [`SimulatedServer`], [`MemoryStore`] and [`RecordingGateway`] implement
//! those seams in-process for tests and dry runs.
//!
//! ## Quick Start Example
//!
//! ```ignore
//! use alt_runner::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     store.insert_alt(AltRecord::new(1, "guild", "Scout")).await?;
//!
//!     let runner = AltRunner::new(RunnerConfig::default(), Arc::new(SimulatedServer::new()), store)?;
//!     runner.init(Arc::new(RecordingGateway::new()));
//!     runner.start_alt("guild", 1).await?;
//!     runner.run_command(1, "spawn").await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod login;
pub mod presence;
pub mod reconnect;
pub mod runner;
pub mod scoreboard;
pub mod sim;
pub mod state;
pub mod store;
pub mod timers;
pub mod types;
pub mod watchlist;
pub mod world;

pub use client::{
    ConnectOptions, ConnectionEvent, DeviceCodePrompt, GameClient, GameConnection, ScoreboardCause,
    ScoreboardUpdate, TabMatch,
};
pub use clock::Clock;
pub use config::{
    BackoffPolicy, ChatSettings, ConnectionSettings, LoginSettings, PresenceSettings, RunnerConfig,
    ServerSettings, WorldSettings,
};
pub use error::{
    ClientError, ConfigError, GatewayError, RunnerError, RunnerResult, StoreError, StoreResult,
};
pub use events::{EventBus, EventBusStats, RunnerEvent, WorldChanged};
pub use gateway::{Embed, EmbedField, Gateway, GatewayCall, Payload, RecordingGateway};
pub use login::{LoginOutcome, LoginScheduler, LoginStats};
pub use presence::{PresenceOutcome, PresenceReport, PresenceTracker, SkipReason, TrackerLabels};
pub use runner::{AltRunner, RunnerStats};
pub use scoreboard::{DisplaySlot, ScoreLine, ScoreboardSnapshot, WorldFilter};
pub use sim::{ChatRecord, SimulatedServer};
pub use store::{AltStore, MemoryStore};
pub use types::{
    AltId, AltRecord, AltStatus, AuthMode, ChannelId, GuildId, MessageId, PersistedStatus,
    PlayerIdentity, TrackerConfig, TrackerConfigPatch, TrackerKind,
};
