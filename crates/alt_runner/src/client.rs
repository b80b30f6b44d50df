//! Game-client seam.
//!
//! The network protocol lives in an external game-client library. The runner
//! only needs to open a connection, receive its lifecycle events in order and
//! issue a handful of commands on the live handle, which is what these traits
//! describe.

use crate::error::ClientResult;
use crate::scoreboard::ScoreboardSnapshot;
use crate::types::{AuthMode, PlayerIdentity};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything needed to open one connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub version: String,
    pub auth: AuthMode,
    pub username: String,
    /// Per-alt directory for the client's cached auth material
    pub profiles_dir: PathBuf,
    pub check_timeout: Duration,
}

/// Pending device-code authorization reported during connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCodePrompt {
    pub user_code: String,
    pub verification_uri: String,
    /// Seconds until the code expires
    pub expires_in: u64,
}

/// What changed on the scoreboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreboardCause {
    Created,
    Position,
    TitleChanged,
    ScoreUpdated,
    ScoreRemoved,
}

impl ScoreboardCause {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoreboardCause::Created => "created",
            ScoreboardCause::Position => "position",
            ScoreboardCause::TitleChanged => "title",
            ScoreboardCause::ScoreUpdated => "score-updated",
            ScoreboardCause::ScoreRemoved => "score-removed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreboardUpdate {
    pub cause: ScoreboardCause,
    pub objective: ScoreboardSnapshot,
}

/// Lifecycle events of one connection, delivered in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Spawn,
    Respawn,
    Kicked(String),
    End(String),
    Error(String),
    DeviceCode(DeviceCodePrompt),
    Scoreboard(ScoreboardUpdate),
    Chat(String),
}

/// One name-completion match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabMatch {
    pub r#match: String,
}

impl TabMatch {
    pub fn new(name: impl Into<String>) -> Self {
        Self { r#match: name.into() }
    }
}

/// A live connection handle
#[async_trait]
pub trait GameConnection: Send + Sync {
    /// Identity of the logged-in player, once known
    fn player(&self) -> Option<PlayerIdentity>;

    /// Sends one chat line or command
    fn chat(&self, line: &str) -> ClientResult<()>;

    /// Asks the server to complete `prefix`
    async fn tab_complete(&self, prefix: &str, timeout: Duration) -> ClientResult<Vec<TabMatch>>;

    /// Current sidebar objective, if one is displayed
    fn sidebar(&self) -> Option<ScoreboardSnapshot>;

    fn has_open_window(&self) -> bool;

    fn close_window(&self);

    /// Closes the connection; an `End` event follows
    fn end(&self, reason: &str);
}

/// Connection factory
#[async_trait]
pub trait GameClient: Send + Sync {
    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> ClientResult<(Arc<dyn GameConnection>, mpsc::UnboundedReceiver<ConnectionEvent>)>;
}
