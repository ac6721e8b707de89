//! Domain entities for the database layer

pub mod conversation;
pub mod message;
pub mod notification;
pub mod participant;
pub mod user;

pub use conversation::{Conversation, ConversationKind};
pub use message::{CreateMessageRequest, Message, MessageTarget};
pub use notification::{CreateNotificationRequest, Notification};
pub use participant::Participant;
pub use user::{CreateUserRequest, User};
