//! Persistence gateway used by the relay.
//!
//! The coordinator and sessions only see [`RelayStore`]; [`SqliteStore`]
//! backs it with the database repositories.

use agora_database::{
    Conversation, ConversationRepository, CreateMessageRequest, CreateNotificationRequest,
    MessageRepository, MessageTarget, NotificationRepository, Participant,
    ParticipantRepository, User, UserRepository,
};
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::error::{RelayError, RelayResult};

#[async_trait]
pub trait RelayStore: Send + Sync {
    async fn get_conversation(&self, conversation_id: i64) -> RelayResult<Option<Conversation>>;

    async fn get_participants(&self, conversation_id: i64) -> RelayResult<Vec<Participant>>;

    async fn is_participant(&self, conversation_id: i64, user_id: i64) -> RelayResult<bool>;

    /// Persist a message routed by conversation; returns the new message id.
    async fn create_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        content: &str,
    ) -> RelayResult<i64>;

    /// Persist a message routed by group; returns the new message id.
    async fn create_group_message(
        &self,
        group_id: i64,
        sender_id: i64,
        content: &str,
    ) -> RelayResult<i64>;

    async fn get_user(&self, user_id: i64) -> RelayResult<User>;

    async fn create_message_notification(
        &self,
        receiver_id: i64,
        sender_id: i64,
        conversation_id: i64,
        sender_display_name: &str,
    ) -> RelayResult<()>;
}

#[derive(Clone)]
pub struct SqliteStore {
    conversations: ConversationRepository,
    participants: ParticipantRepository,
    messages: MessageRepository,
    users: UserRepository,
    notifications: NotificationRepository,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            conversations: ConversationRepository::new(pool.clone()),
            participants: ParticipantRepository::new(pool.clone()),
            messages: MessageRepository::new(pool.clone()),
            users: UserRepository::new(pool.clone()),
            notifications: NotificationRepository::new(pool),
        }
    }
}

#[async_trait]
impl RelayStore for SqliteStore {
    async fn get_conversation(&self, conversation_id: i64) -> RelayResult<Option<Conversation>> {
        Ok(self.conversations.find_by_id(conversation_id).await?)
    }

    async fn get_participants(&self, conversation_id: i64) -> RelayResult<Vec<Participant>> {
        Ok(self.participants.find_by_conversation(conversation_id).await?)
    }

    async fn is_participant(&self, conversation_id: i64, user_id: i64) -> RelayResult<bool> {
        Ok(self.participants.is_participant(conversation_id, user_id).await?)
    }

    async fn create_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        content: &str,
    ) -> RelayResult<i64> {
        let request = CreateMessageRequest::new(
            MessageTarget::Conversation(conversation_id),
            sender_id,
            content,
        );
        Ok(self.messages.create(&request).await?.id)
    }

    async fn create_group_message(
        &self,
        group_id: i64,
        sender_id: i64,
        content: &str,
    ) -> RelayResult<i64> {
        let request = CreateMessageRequest::new(MessageTarget::Group(group_id), sender_id, content);
        Ok(self.messages.create(&request).await?.id)
    }

    async fn get_user(&self, user_id: i64) -> RelayResult<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("user {user_id}")))
    }

    async fn create_message_notification(
        &self,
        receiver_id: i64,
        sender_id: i64,
        conversation_id: i64,
        sender_display_name: &str,
    ) -> RelayResult<()> {
        let request = CreateNotificationRequest {
            receiver_id,
            sender_id,
            conversation_id,
            sender_name: sender_display_name.to_string(),
        };
        self.notifications.create(&request).await?;
        Ok(())
    }
}
