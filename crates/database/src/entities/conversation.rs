//! Conversation entity definitions

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub is_group: bool,
    pub group_id: Option<i64>,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Direct and group conversations are mutually exclusive and fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group { group_id: i64 },
}

impl Conversation {
    pub fn kind(&self) -> ConversationKind {
        match (self.is_group, self.group_id) {
            (true, Some(group_id)) => ConversationKind::Group { group_id },
            _ => ConversationKind::Direct,
        }
    }
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group { .. } => "group",
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, ConversationKind::Group { .. })
    }
}
