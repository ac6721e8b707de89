//! Repository for conversation membership.

use crate::entities::Participant;
use crate::types::{DatabaseError, DatabaseResult};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::info;

/// Repository for participant database operations
#[derive(Clone)]
pub struct ParticipantRepository {
    pool: SqlitePool,
}

impl ParticipantRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Find all participants of a conversation
    pub async fn find_by_conversation(&self, conversation_id: i64) -> DatabaseResult<Vec<Participant>> {
        let rows = sqlx::query(
            "SELECT conversation_id, user_id, joined_at
             FROM participants WHERE conversation_id = ? ORDER BY joined_at ASC, user_id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_participant).collect()
    }

    /// Check whether a user is a participant of a conversation
    pub async fn is_participant(&self, conversation_id: i64, user_id: i64) -> DatabaseResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM participants WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    /// Add a member to a group conversation. Direct conversations have a
    /// fixed pair of participants and reject additions.
    pub async fn add_to_group(&self, conversation_id: i64, user_id: i64) -> DatabaseResult<Participant> {
        let is_group: Option<bool> =
            sqlx::query_scalar("SELECT is_group FROM conversations WHERE id = ?")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;

        match is_group {
            None => {
                return Err(DatabaseError::NotFound(format!(
                    "conversation {conversation_id}"
                )))
            }
            Some(false) => {
                return Err(DatabaseError::ValidationError(
                    "direct conversations always have exactly two participants".to_string(),
                ))
            }
            Some(true) => {}
        }

        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR IGNORE INTO participants (conversation_id, user_id, joined_at) VALUES (?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        info!(conversation_id, user_id, "added participant to group conversation");

        let row = sqlx::query(
            "SELECT conversation_id, user_id, joined_at FROM participants
             WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        map_participant(&row)
    }
}

fn map_participant(row: &SqliteRow) -> DatabaseResult<Participant> {
    Ok(Participant {
        conversation_id: row.try_get("conversation_id")?,
        user_id: row.try_get("user_id")?,
        joined_at: row.try_get("joined_at")?,
    })
}
