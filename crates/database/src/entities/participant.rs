//! Participant entity definitions

use serde::{Deserialize, Serialize};

/// Durable conversation membership, unique per (conversation_id, user_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: i64,
    pub user_id: i64,
    pub joined_at: String,
}
