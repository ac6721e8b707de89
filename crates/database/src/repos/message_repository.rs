//! Repository for message data access operations.

use crate::entities::{CreateMessageRequest, Message, MessageTarget};
use crate::types::{DatabaseError, DatabaseResult};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, info};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, group_id, sender_id, content, attachments, is_deleted, created_at";

/// Repository for message database operations
#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a message. Content is stored exactly as given.
    pub async fn create(&self, request: &CreateMessageRequest) -> DatabaseResult<Message> {
        let now = Utc::now().to_rfc3339();
        let attachments = if request.attachments.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&request.attachments)?)
        };
        let (conversation_id, group_id) = match request.target {
            MessageTarget::Conversation(id) => (Some(id), None),
            MessageTarget::Group(id) => (None, Some(id)),
        };

        let mut tx = self.pool.begin().await?;

        let message_id = sqlx::query(
            "INSERT INTO messages (conversation_id, group_id, sender_id, content, attachments, is_deleted, created_at)
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(conversation_id)
        .bind(group_id)
        .bind(request.sender_id)
        .bind(&request.content)
        .bind(&attachments)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            "UPDATE conversations SET updated_at = ?
             WHERE id = ? OR (group_id IS NOT NULL AND group_id = ?)",
        )
        .bind(&now)
        .bind(conversation_id)
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(message_id, sender_id = request.sender_id, target = ?request.target, "stored message");

        self.find_by_id(message_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("message {message_id}")))
    }

    /// Find message by ID, including soft-deleted ones
    pub async fn find_by_id(&self, id: i64) -> DatabaseResult<Option<Message>> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| map_message(&row)).transpose()
    }

    /// Visible messages of a conversation in insertion order. Group
    /// conversations also include messages routed by their group id.
    pub async fn find_by_conversation(&self, conversation_id: i64) -> DatabaseResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE is_deleted = 0
               AND (conversation_id = ?
                    OR group_id = (SELECT group_id FROM conversations WHERE id = ? AND group_id IS NOT NULL))
             ORDER BY id ASC"
        ))
        .bind(conversation_id)
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_message).collect()
    }

    /// Flag a message as deleted. Returns false when it was already deleted
    /// or does not exist.
    pub async fn soft_delete(&self, id: i64) -> DatabaseResult<bool> {
        let result = sqlx::query("UPDATE messages SET is_deleted = 1 WHERE id = ? AND is_deleted = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(message_id = id, "soft-deleted message");
        }
        Ok(deleted)
    }
}

fn map_message(row: &SqliteRow) -> DatabaseResult<Message> {
    let attachments: Option<String> = row.try_get("attachments")?;
    let attachments = match attachments {
        Some(raw) => serde_json::from_str(&raw)?,
        None => Vec::new(),
    };

    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        group_id: row.try_get("group_id")?,
        sender_id: row.try_get("sender_id")?,
        content: row.try_get("content")?,
        attachments,
        is_deleted: row.try_get("is_deleted")?,
        created_at: row.try_get("created_at")?,
    })
}
