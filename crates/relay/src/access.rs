//! Conversation membership checks.

use tracing::warn;

use crate::error::{RelayError, RelayResult};
use crate::store::RelayStore;

/// Succeeds when `user_id` is a participant of `conversation_id`.
///
/// Storage failures deny access with the same error as a non-member.
pub async fn authorize(store: &dyn RelayStore, user_id: i64, conversation_id: i64) -> RelayResult<()> {
    match store.is_participant(conversation_id, user_id).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(RelayError::Authorization {
            user_id,
            conversation_id,
        }),
        Err(e) => {
            warn!(
                user_id,
                conversation_id,
                error = %e,
                "participant lookup failed, denying access"
            );
            Err(RelayError::Authorization {
                user_id,
                conversation_id,
            })
        }
    }
}

/// Whether `user_id` is a participant of `conversation_id`.
pub async fn can_access(store: &dyn RelayStore, user_id: i64, conversation_id: i64) -> bool {
    authorize(store, user_id, conversation_id).await.is_ok()
}
