//! Chat-platform seam.
//!
//! Operator notices, presence lists and alerts all leave the process through
//! [`Gateway`]. Payloads carry plain data only; turning them into platform
//! embeds is the gateway implementation's job.

use crate::error::{GatewayError, GatewayResult};
use crate::types::{ChannelId, MessageId, TrackerKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Embed {
    pub title: String,
    pub description: Option<String>,
    pub color: Option<u32>,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
    /// Link button as `(label, url)`
    pub link: Option<(String, String)>,
}

/// Message content handed to the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Payload {
    pub content: Option<String>,
    pub embed: Option<Embed>,
}

impl Payload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embed: None,
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            content: None,
            embed: Some(embed),
        }
    }
}

/// Chat gateway collaborator
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Posts to the guild's alt-manager channel; `None` when none is configured
    async fn post_to_alt_channel(&self, guild_id: &str, payload: Payload) -> Option<MessageId>;

    async fn delete_alt_channel_message(&self, guild_id: &str, message_id: &str);

    /// Finds or creates the alerts channel for a tracker kind
    async fn ensure_alerts_channel(&self, guild_id: &str, kind: TrackerKind) -> Option<ChannelId>;

    async fn channel_exists(&self, channel_id: &str) -> bool;

    async fn send_message(&self, channel_id: &str, payload: Payload) -> GatewayResult<MessageId>;

    async fn edit_message(&self, channel_id: &str, message_id: &str, payload: Payload) -> GatewayResult<()>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> GatewayResult<()>;
}

/// One gateway call as seen by [`RecordingGateway`]
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    AltChannelPost { guild_id: String, payload: Payload, message_id: MessageId },
    AltChannelDelete { guild_id: String, message_id: MessageId },
    Send { channel_id: ChannelId, payload: Payload, message_id: MessageId },
    Edit { channel_id: ChannelId, message_id: MessageId, payload: Payload },
    Delete { channel_id: ChannelId, message_id: MessageId },
}

/// In-memory gateway that records every call.
///
/// Channels must be registered before messages can be sent to them; the alerts
/// channel is created on first use. Editing can be switched off to exercise the
/// delete-and-resend path.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    channels: Mutex<HashSet<ChannelId>>,
    messages: Mutex<HashMap<MessageId, ChannelId>>,
    alert_channels: Mutex<HashMap<(String, TrackerKind), ChannelId>>,
    edits_fail: Mutex<bool>,
    next_id: AtomicU64,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, channel_id: impl Into<ChannelId>) {
        self.channels.lock().insert(channel_id.into());
    }

    pub fn remove_channel(&self, channel_id: &str) {
        self.channels.lock().remove(channel_id);
    }

    pub fn set_edits_fail(&self, fail: bool) {
        *self.edits_fail.lock() = fail;
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Text content of every message sent to `channel_id`
    pub fn texts_sent_to(&self, channel_id: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                GatewayCall::Send { channel_id: c, payload, .. } if c == channel_id => payload.content.clone(),
                _ => None,
            })
            .collect()
    }

    pub fn alt_channel_posts(&self) -> Vec<Payload> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                GatewayCall::AltChannelPost { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    fn next_message_id(&self) -> MessageId {
        format!("m{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn post_to_alt_channel(&self, guild_id: &str, payload: Payload) -> Option<MessageId> {
        let message_id = self.next_message_id();
        self.calls.lock().push(GatewayCall::AltChannelPost {
            guild_id: guild_id.to_string(),
            payload,
            message_id: message_id.clone(),
        });
        Some(message_id)
    }

    async fn delete_alt_channel_message(&self, guild_id: &str, message_id: &str) {
        self.calls.lock().push(GatewayCall::AltChannelDelete {
            guild_id: guild_id.to_string(),
            message_id: message_id.to_string(),
        });
    }

    async fn ensure_alerts_channel(&self, guild_id: &str, kind: TrackerKind) -> Option<ChannelId> {
        let channel_id = self
            .alert_channels
            .lock()
            .entry((guild_id.to_string(), kind))
            .or_insert_with(|| format!("{}-{}", guild_id, kind.alerts_channel_name()))
            .clone();
        self.channels.lock().insert(channel_id.clone());
        Some(channel_id)
    }

    async fn channel_exists(&self, channel_id: &str) -> bool {
        self.channels.lock().contains(channel_id)
    }

    async fn send_message(&self, channel_id: &str, payload: Payload) -> GatewayResult<MessageId> {
        if !self.channels.lock().contains(channel_id) {
            return Err(GatewayError::ChannelNotFound(channel_id.to_string()));
        }
        let message_id = self.next_message_id();
        self.messages.lock().insert(message_id.clone(), channel_id.to_string());
        self.calls.lock().push(GatewayCall::Send {
            channel_id: channel_id.to_string(),
            payload,
            message_id: message_id.clone(),
        });
        Ok(message_id)
    }

    async fn edit_message(&self, channel_id: &str, message_id: &str, payload: Payload) -> GatewayResult<()> {
        if *self.edits_fail.lock() {
            return Err(GatewayError::Request("edit rejected".into()));
        }
        if self.messages.lock().get(message_id).map(String::as_str) != Some(channel_id) {
            return Err(GatewayError::MessageNotFound(message_id.to_string()));
        }
        self.calls.lock().push(GatewayCall::Edit {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            payload,
        });
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> GatewayResult<()> {
        if self.messages.lock().remove(message_id).is_none() {
            return Err(GatewayError::MessageNotFound(message_id.to_string()));
        }
        self.calls.lock().push(GatewayCall::Delete {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
        });
        Ok(())
    }
}
