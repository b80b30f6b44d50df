//! Chat gateway that writes every message to the log.
//!
//! Stands in for the chat platform so the daemon can run headless. Message
//! ids are handed out sequentially and remembered so edits and deletes of
//! unknown ids fail the way a real platform would.

use alt_runner::{ChannelId, Gateway, GatewayError, MessageId, Payload, TrackerKind};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Debug, Default)]
pub struct LogGateway {
    messages: DashMap<MessageId, ChannelId>,
    next_id: AtomicU64,
}

impl LogGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_message_id(&self) -> MessageId {
        format!("log-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    #[cfg(test)]
    pub fn live_messages(&self) -> usize {
        self.messages.len()
    }
}

fn describe(payload: &Payload) -> String {
    match (&payload.content, &payload.embed) {
        (Some(content), _) => content.clone(),
        (None, Some(embed)) => {
            let fields: Vec<String> = embed
                .fields
                .iter()
                .map(|f| format!("{}: {}", f.name, f.value.replace('\n', ", ")))
                .collect();
            match &embed.description {
                Some(description) => format!("[{}] {} | {}", embed.title, description, fields.join(" | ")),
                None => format!("[{}] {}", embed.title, fields.join(" | ")),
            }
        }
        (None, None) => String::new(),
    }
}

#[async_trait]
impl Gateway for LogGateway {
    async fn post_to_alt_channel(&self, guild_id: &str, payload: Payload) -> Option<MessageId> {
        let message_id = self.next_message_id();
        let channel_id = format!("{}-alts", guild_id);
        info!(guild_id, message_id = %message_id, "📨 {}", describe(&payload));
        self.messages.insert(message_id.clone(), channel_id);
        Some(message_id)
    }

    async fn delete_alt_channel_message(&self, guild_id: &str, message_id: &str) {
        if self.messages.remove(message_id).is_some() {
            info!(guild_id, message_id, "🗑️ Notice removed");
        }
    }

    async fn ensure_alerts_channel(&self, guild_id: &str, kind: TrackerKind) -> Option<ChannelId> {
        Some(format!("{}-{}", guild_id, kind.alerts_channel_name()))
    }

    async fn channel_exists(&self, _channel_id: &str) -> bool {
        true
    }

    async fn send_message(&self, channel_id: &str, payload: Payload) -> Result<MessageId, GatewayError> {
        let message_id = self.next_message_id();
        info!(channel_id, message_id = %message_id, "📨 {}", describe(&payload));
        self.messages.insert(message_id.clone(), channel_id.to_string());
        Ok(message_id)
    }

    async fn edit_message(&self, channel_id: &str, message_id: &str, payload: Payload) -> Result<(), GatewayError> {
        match self.messages.get(message_id) {
            Some(owner) if owner.value() == channel_id => {
                info!(channel_id, message_id, "✏️ {}", describe(&payload));
                Ok(())
            }
            _ => Err(GatewayError::MessageNotFound(message_id.to_string())),
        }
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), GatewayError> {
        match self.messages.remove(message_id) {
            Some(_) => {
                info!(channel_id, message_id, "🗑️ Message removed");
                Ok(())
            }
            None => Err(GatewayError::MessageNotFound(message_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alt_runner::Embed;

    #[tokio::test]
    async fn test_edit_and_delete_follow_sent_messages() {
        let gateway = LogGateway::new();
        let id = gateway.send_message("chan", Payload::text("hello")).await.unwrap();

        assert!(gateway.edit_message("chan", &id, Payload::text("again")).await.is_ok());
        assert!(gateway.edit_message("other", &id, Payload::text("again")).await.is_err());

        gateway.delete_message("chan", &id).await.unwrap();
        assert!(gateway.edit_message("chan", &id, Payload::text("gone")).await.is_err());
        assert_eq!(gateway.live_messages(), 0);
    }

    #[tokio::test]
    async fn test_alt_channel_notices_get_distinct_ids() {
        let gateway = LogGateway::new();
        let a = gateway.post_to_alt_channel("g", Payload::text("one")).await.unwrap();
        let b = gateway.post_to_alt_channel("g", Payload::text("two")).await.unwrap();
        assert_ne!(a, b);
        gateway.delete_alt_channel_message("g", &a).await;
        assert_eq!(gateway.live_messages(), 1);
    }

    #[test]
    fn test_describe_embed() {
        let embed = Embed {
            title: "Tracker".into(),
            fields: vec![alt_runner::EmbedField {
                name: "Players (2)".into(),
                value: "• A\n• B".into(),
            }],
            ..Default::default()
        };
        assert_eq!(describe(&Payload::embed(embed)), "[Tracker] Players (2): • A, • B");
    }
}
