//! User repository for database operations.

use crate::entities::{CreateUserRequest, User};
use crate::types::{DatabaseError, DatabaseResult};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::info;

/// Repository for user profile reads and seeding
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Find user by ID
    pub async fn find_by_id(&self, id: i64) -> DatabaseResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, first_name, last_name, avatar, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| map_user(&row)).transpose()
    }

    /// Create a new user profile
    pub async fn create(&self, request: &CreateUserRequest) -> DatabaseResult<User> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO users (first_name, last_name, avatar, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&request.first_name)
        .bind(&request.last_name)
        .bind(&request.avatar)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let user_id = result.last_insert_rowid();
        info!(user_id, "created user profile");

        self.find_by_id(user_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("user {user_id}")))
    }
}

fn map_user(row: &SqliteRow) -> DatabaseResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        avatar: row.try_get("avatar")?,
        created_at: row.try_get("created_at")?,
    })
}
