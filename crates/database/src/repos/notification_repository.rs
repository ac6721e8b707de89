//! Notification repository for database operations.

use crate::entities::{CreateNotificationRequest, Notification};
use crate::types::{DatabaseError, DatabaseResult};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;

const NOTIFICATION_COLUMNS: &str =
    "id, receiver_id, sender_id, conversation_id, sender_name, content, is_read, created_at";

/// Repository for notification database operations
#[derive(Clone)]
pub struct NotificationRepository {
    pool: SqlitePool,
}

impl NotificationRepository {
    /// Create a new notification repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new message notification
    pub async fn create(&self, request: &CreateNotificationRequest) -> DatabaseResult<Notification> {
        let now = chrono::Utc::now().to_rfc3339();

        let notification_id = sqlx::query(
            "INSERT INTO notifications (receiver_id, sender_id, conversation_id, sender_name, content, is_read, created_at)
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(request.receiver_id)
        .bind(request.sender_id)
        .bind(request.conversation_id)
        .bind(&request.sender_name)
        .bind(request.content())
        .bind(&now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        debug!(
            notification_id,
            receiver_id = request.receiver_id,
            conversation_id = request.conversation_id,
            "created message notification"
        );

        let row = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"
        ))
        .bind(notification_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("notification {notification_id}")))?;

        map_notification(&row)
    }

    /// Notifications addressed to a user, newest first
    pub async fn find_by_receiver(&self, receiver_id: i64) -> DatabaseResult<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE receiver_id = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(receiver_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_notification).collect()
    }
}

fn map_notification(row: &SqliteRow) -> DatabaseResult<Notification> {
    Ok(Notification {
        id: row.try_get("id")?,
        receiver_id: row.try_get("receiver_id")?,
        sender_id: row.try_get("sender_id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_name: row.try_get("sender_name")?,
        content: row.try_get("content")?,
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
    })
}
