use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::info;

use super::AppState;
use crate::error::{AssistantError, Result};
use crate::models::ChatMessage;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

/// Pulls the token out of `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AssistantError::Unauthorized("missing bearer token".into()))
}

/// POST {chat_path}: authenticates, then streams the orchestrated answer
pub async fn chat(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response> {
    // Credentials are checked before the body is even parsed
    let token = bearer_token(&headers)?;
    let owner_id = state.auth.authenticate(token).await?;

    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|e| AssistantError::InvalidRequest(format!("invalid chat body: {e}")))?;
    info!(owner = %owner_id, messages = request.messages.len(), "Chat request");

    let stream = state
        .orchestrator
        .respond(&owner_id, request.messages)
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
