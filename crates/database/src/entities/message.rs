//! Message entity definitions

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: Option<i64>,
    pub group_id: Option<i64>,
    pub sender_id: i64,
    pub content: String,
    pub attachments: Vec<String>,
    pub is_deleted: bool,
    pub created_at: String,
}

/// Where a message is routed: a direct conversation or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageTarget {
    Conversation(i64),
    Group(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    pub target: MessageTarget,
    pub sender_id: i64,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl CreateMessageRequest {
    pub fn new(target: MessageTarget, sender_id: i64, content: impl Into<String>) -> Self {
        Self {
            target,
            sender_id,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }
}
