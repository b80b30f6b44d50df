//! Error types for the alt runner and its collaborators

use crate::types::AltId;
use std::{io::Error as IoError, path::PathBuf};
use thiserror::Error;

/// Failures reported by a game-client implementation
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection is closed")]
    Closed,

    #[error("Failed to send chat line: {0}")]
    Send(String),

    #[error("Name completion failed: {0}")]
    Completion(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),
}

/// Persistence collaborator errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Alt {0} not found")]
    AltNotFound(AltId),

    #[error("Failed to read store file {0}: {1}")]
    FileRead(PathBuf, IoError),

    #[error("Failed to write store file {0}: {1}")]
    FileWrite(PathBuf, IoError),

    #[error("Failed to decode store file {0}: {1}")]
    Deserialization(PathBuf, serde_json::Error),

    #[error("Failed to encode store snapshot: {0}")]
    Serialization(serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Chat gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Channel {0} not found")]
    ChannelNotFound(String),

    #[error("Message {0} not found")]
    MessageNotFound(String),

    #[error("Gateway request failed: {0}")]
    Request(String),
}

/// Invalid runner configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Invalid world deny pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Errors surfaced by user-invoked runner operations
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Alt {0} not found")]
    AltNotFound(AltId),

    #[error("Empty command")]
    EmptyCommand,

    #[error("Login failed for alt {alt_id}: {reason}")]
    Login { alt_id: AltId, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RunnerError {
    /// Maps store-level "not found" onto the facade's own variant
    pub(crate) fn from_store(alt_id: AltId, err: StoreError) -> Self {
        match err {
            StoreError::AltNotFound(_) => RunnerError::AltNotFound(alt_id),
            other => RunnerError::Store(other),
        }
    }
}

pub type RunnerResult<T> = Result<T, RunnerError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type ClientResult<T> = Result<T, ClientError>;
pub type GatewayResult<T> = Result<T, GatewayError>;
