//! Agora Database Crate
//!
//! Storage for the message relay: connection management, migrations, and
//! repositories for users, conversations, participants, messages, and
//! notifications.

use agora_config::DatabaseConfig;
use sqlx::SqlitePool;

pub mod connection;
pub mod entities;
pub mod migrations;
pub mod repos;
pub mod types;

pub use connection::{prepare_database, DatabaseConnection};
pub use migrations::run_migrations;

pub use repos::{
    ConversationRepository, MessageRepository, NotificationRepository, ParticipantRepository,
    UserRepository,
};

pub use entities::{
    Conversation, ConversationKind, CreateMessageRequest, CreateNotificationRequest,
    CreateUserRequest, Message, MessageTarget, Notification, Participant, User,
};

pub use types::{DatabaseError, DatabaseResult};

/// Initialize the database with migrations
pub async fn initialize_database(config: &DatabaseConfig) -> DatabaseResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| DatabaseError::ConnectionError(format!("{e:#}")))?;

    run_migrations(&pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("{e:#}")))?;

    Ok(pool)
}
