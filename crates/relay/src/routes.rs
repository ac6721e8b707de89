//! HTTP surface: the WebSocket upgrade and a health check.

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{header::AUTHORIZATION, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::{RelayError, RelayResult};
use crate::protocol::GLOBAL_CONVERSATION;
use crate::session;
use crate::state::RelayState;

pub fn create_router(state: RelayState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct WebSocketQuery {
    pub token: Option<String>,
    pub conversation_id: Option<i64>,
}

/// Authenticate, then hand the upgraded socket to a session.
///
/// The token comes from `Authorization: Bearer` or the `token` query
/// parameter; browsers cannot set headers on WebSocket requests.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
    Query(query): Query<WebSocketQuery>,
    headers: HeaderMap,
) -> RelayResult<Response> {
    let token = bearer_token(&headers)
        .or(query.token.as_deref())
        .ok_or_else(|| RelayError::Unauthenticated("missing token".into()))?;
    let claims = state.verifier.verify(token)?;
    let conversation_id = query.conversation_id.unwrap_or(GLOBAL_CONVERSATION);

    debug!(user_id = claims.user_id, conversation_id, "upgrading websocket");

    let max_frame_bytes = state.config.max_frame_bytes;
    Ok(ws
        .max_message_size(max_frame_bytes)
        .max_frame_size(max_frame_bytes)
        .on_upgrade(move |socket| session::serve(socket, state, claims, conversation_id)))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn health_check(State(state): State<RelayState>) -> RelayResult<impl IntoResponse> {
    let snapshot = state.coordinator.snapshot().await?;
    Ok(Json(json!({
        "status": "ok",
        "connections": snapshot.connections,
        "users": snapshot.users,
        "conversations": snapshot.conversations.len(),
    })))
}
