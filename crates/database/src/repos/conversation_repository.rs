//! Repository for conversation data access operations.

use crate::entities::Conversation;
use crate::types::{DatabaseError, DatabaseResult};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, info};

const CONVERSATION_COLUMNS: &str = "id, is_group, group_id, name, created_at, updated_at";

/// Repository for conversation database operations
#[derive(Clone)]
pub struct ConversationRepository {
    pool: SqlitePool,
}

impl ConversationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Find conversation by ID
    pub async fn find_by_id(&self, id: i64) -> DatabaseResult<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| map_conversation(&row)).transpose()
    }

    /// Find the direct conversation shared by two users, if one exists
    pub async fn find_direct_between(&self, user_a: i64, user_b: i64) -> DatabaseResult<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE direct_key = ?"
        ))
        .bind(direct_key(user_a, user_b))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| map_conversation(&row)).transpose()
    }

    /// Return the direct conversation between two users, creating it with
    /// exactly those two participants when it does not exist yet.
    ///
    /// Concurrent callers for the same pair converge on one row: the unique
    /// `direct_key` turns a lost race into a no-op insert.
    pub async fn find_or_create_direct(&self, user_a: i64, user_b: i64) -> DatabaseResult<Conversation> {
        if user_a == user_b {
            return Err(DatabaseError::ValidationError(
                "a direct conversation needs two distinct users".to_string(),
            ));
        }

        if let Some(existing) = self.find_direct_between(user_a, user_b).await? {
            return Ok(existing);
        }

        let now = Utc::now().to_rfc3339();
        let key = direct_key(user_a, user_b);
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO conversations (is_group, group_id, name, direct_key, created_at, updated_at)
             VALUES (0, NULL, '', ?, ?, ?)
             ON CONFLICT(direct_key) DO NOTHING",
        )
        .bind(&key)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(user_a, user_b, "direct conversation created concurrently");
            return self
                .find_direct_between(user_a, user_b)
                .await?
                .ok_or_else(|| DatabaseError::NotFound(format!("direct conversation {key}")));
        }

        let conversation_id = inserted.last_insert_rowid();
        for user_id in [user_a, user_b] {
            sqlx::query(
                "INSERT INTO participants (conversation_id, user_id, joined_at) VALUES (?, ?, ?)",
            )
            .bind(conversation_id)
            .bind(user_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(conversation_id, user_a, user_b, "created direct conversation");

        self.find_by_id(conversation_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("conversation {conversation_id}")))
    }

    /// Create the conversation backing a group together with its initial members
    pub async fn create_group(
        &self,
        group_id: i64,
        name: &str,
        members: &[i64],
    ) -> DatabaseResult<Conversation> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let conversation_id = sqlx::query(
            "INSERT INTO conversations (is_group, group_id, name, created_at, updated_at)
             VALUES (1, ?, ?, ?, ?)",
        )
        .bind(group_id)
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for user_id in members {
            sqlx::query(
                "INSERT OR IGNORE INTO participants (conversation_id, user_id, joined_at) VALUES (?, ?, ?)",
            )
            .bind(conversation_id)
            .bind(user_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            conversation_id,
            group_id,
            members = members.len(),
            "created group conversation"
        );

        self.find_by_id(conversation_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("conversation {conversation_id}")))
    }

    /// List every conversation, oldest first
    pub async fn find_all(&self) -> DatabaseResult<Vec<Conversation>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_conversation).collect()
    }
}

fn direct_key(user_a: i64, user_b: i64) -> String {
    format!("{}:{}", user_a.min(user_b), user_a.max(user_b))
}

fn map_conversation(row: &SqliteRow) -> DatabaseResult<Conversation> {
    Ok(Conversation {
        id: row.try_get("id")?,
        is_group: row.try_get("is_group")?,
        group_id: row.try_get("group_id")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
