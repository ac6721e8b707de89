//! Notification entity definitions

use serde::{Deserialize, Serialize};

/// A durable stand-in for a message the receiver was not connected to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub receiver_id: i64,
    pub sender_id: i64,
    pub conversation_id: i64,
    pub sender_name: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNotificationRequest {
    pub receiver_id: i64,
    pub sender_id: i64,
    pub conversation_id: i64,
    pub sender_name: String,
}

impl CreateNotificationRequest {
    pub fn content(&self) -> String {
        if self.sender_name.is_empty() {
            "You have a new message".to_string()
        } else {
            format!("{} sent you a message", self.sender_name)
        }
    }
}
