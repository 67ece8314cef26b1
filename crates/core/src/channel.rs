//! Transport boundary.
//!
//! A transport (Telegram, CLI, ...) delivers [`InboundMessage`] envelopes
//! and accepts [`OutboundPayload`]s for a chat. The orchestration core only
//! ever holds the narrow [`Outbound`] capability; session management stays
//! inside the [`Channel`] implementation.

use crate::error::ChannelError;
use crate::thread::ChatScope;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The message an inbound message replies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyAnchor {
    pub message_id: String,

    /// When the anchor was originally sent, if the transport knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// An inbound envelope from a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Transport message ID, unique within the chat.
    pub message_id: String,

    pub chat: ChatScope,

    pub actor_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_name: Option<String>,

    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyAnchor>,

    /// Origin time as reported by the transport.
    pub timestamp: DateTime<Utc>,

    /// Set by the transport when the message mentions the persona.
    #[serde(default)]
    pub addressed: bool,
}

impl InboundMessage {
    pub fn new(
        message_id: impl Into<String>,
        chat: ChatScope,
        actor_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            chat,
            actor_id: actor_id.into(),
            actor_name: None,
            text: text.into(),
            reply_to: None,
            timestamp: Utc::now(),
            addressed: false,
        }
    }

    pub fn with_actor_name(mut self, name: impl Into<String>) -> Self {
        self.actor_name = Some(name.into());
        self
    }

    pub fn replying_to(mut self, anchor: ReplyAnchor) -> Self {
        self.reply_to = Some(anchor);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn addressed(mut self) -> Self {
        self.addressed = true;
        self
    }

    /// Display name, falling back to the actor ID.
    pub fn display_name(&self) -> &str {
        self.actor_name.as_deref().unwrap_or(&self.actor_id)
    }
}

/// What the core hands back to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "lowercase")]
pub enum OutboundPayload {
    Text(String),
    /// Text the transport should synthesize to speech.
    Voice(String),
}

impl OutboundPayload {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(t) | Self::Voice(t) => t,
        }
    }
}

/// The only way the core talks back to a transport.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Deliver one payload. Returns the transport's id for the sent message
    /// when it assigns one, so later replies to it can be anchored.
    async fn send(
        &self,
        chat: &ChatScope,
        payload: OutboundPayload,
    ) -> std::result::Result<Option<String>, ChannelError>;
}

/// A full transport: a source of inbound messages that can also send.
#[async_trait]
pub trait Channel: Outbound {
    /// Human-readable channel name (e.g., "telegram", "cli").
    /// Also used as the chronicle tag for exchanges on this channel.
    fn name(&self) -> &str;

    /// Start listening for inbound messages.
    async fn start(
        &self,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<InboundMessage, ChannelError>>,
        ChannelError,
    >;

    /// Stop the channel gracefully.
    async fn stop(&self) -> std::result::Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_reply_anchor() {
        let msg = InboundMessage::new("7", ChatScope::group("-1"), "u1", "and then?")
            .with_actor_name("Alice")
            .replying_to(ReplyAnchor {
                message_id: "3".into(),
                timestamp: None,
            });
        assert_eq!(msg.display_name(), "Alice");
        assert_eq!(msg.reply_to.as_ref().map(|a| a.message_id.as_str()), Some("3"));
        assert!(!msg.addressed);
    }

    #[test]
    fn display_name_falls_back_to_actor_id() {
        let msg = InboundMessage::new("1", ChatScope::direct("9"), "u9", "hi");
        assert_eq!(msg.display_name(), "u9");
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let json = serde_json::to_value(OutboundPayload::Voice("hello".into())).unwrap();
        assert_eq!(json["kind"], "voice");
        assert_eq!(json["text"], "hello");
    }
}
