//! Error types for the relay

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Relay error types.
///
/// None of these is fatal to the coordinator: connection errors end one
/// connection, persistence errors drop one message.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    #[error("User {user_id} is not a participant of conversation {conversation_id}")]
    Authorization { user_id: i64, conversation_id: i64 },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Coordinator is not running")]
    CoordinatorUnavailable,
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            RelayError::Authorization { .. } => StatusCode::FORBIDDEN,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Protocol(_) => StatusCode::BAD_REQUEST,
            RelayError::CoordinatorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::Persistence(_) | RelayError::Transport(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = json!({
            "error": status.as_str(),
            "message": self.to_string(),
        });

        (status, Json(error_response)).into_response()
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

impl From<agora_database::DatabaseError> for RelayError {
    fn from(error: agora_database::DatabaseError) -> Self {
        match error {
            agora_database::DatabaseError::NotFound(what) => RelayError::NotFound(what),
            other => RelayError::Persistence(other.to_string()),
        }
    }
}

impl From<axum::Error> for RelayError {
    fn from(error: axum::Error) -> Self {
        RelayError::Transport(error.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(error: serde_json::Error) -> Self {
        RelayError::Protocol(error.to_string())
    }
}
