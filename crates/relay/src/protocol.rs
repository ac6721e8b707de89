//! JSON frames exchanged with clients over the WebSocket.
//!
//! Every frame is an object tagged by `type`. Unknown client tags decode to
//! [`ClientFrame::Unknown`] and are ignored; anything that is not a JSON
//! object with a `type` field is a protocol error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

/// Conversation id meaning "registered to no conversation".
pub const GLOBAL_CONVERSATION: i64 = 0;

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Move this connection to a conversation; `0` returns it to global.
    Register { conversation_id: i64 },
    ChatMessage(ChatFrame),
    /// Application-level liveness check, answered with [`ServerFrame::Pong`].
    #[serde(alias = "heartbeat")]
    Ping,
    Pong,
    #[serde(other)]
    Unknown,
}

/// Body of an inbound `chat_message`.
///
/// `sender_id` is accepted for compatibility but never trusted; the sender is
/// always the authenticated user of the connection.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ChatFrame {
    #[serde(default)]
    pub conversation_id: Option<i64>,
    #[serde(default)]
    pub sender_id: Option<i64>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Frames the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected {
        user_id: i64,
        conversation_id: i64,
    },
    Registered {
        conversation_id: i64,
    },
    ChatMessage(DeliveredMessage),
    /// Non-chat notice published into a conversation by other services.
    Event {
        conversation_id: i64,
        name: String,
        payload: serde_json::Value,
    },
    Pong,
}

/// A persisted chat message enriched with sender display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ClientFrame {
    pub fn decode(bytes: &[u8]) -> RelayResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| RelayError::Protocol(e.to_string()))
    }
}

impl ServerFrame {
    pub fn encode(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Connected { .. } => "connected",
            ServerFrame::Registered { .. } => "registered",
            ServerFrame::ChatMessage(_) => "chat_message",
            ServerFrame::Event { .. } => "event",
            ServerFrame::Pong => "pong",
        }
    }
}
