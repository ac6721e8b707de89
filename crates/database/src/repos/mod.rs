//! Database repository implementations

pub mod conversation_repository;
pub mod message_repository;
pub mod notification_repository;
pub mod participant_repository;
pub mod user_repository;

pub use conversation_repository::*;
pub use message_repository::*;
pub use notification_repository::*;
pub use participant_repository::*;
pub use user_repository::*;
