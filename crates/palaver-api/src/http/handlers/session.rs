//! Session HTTP handlers.
//!
//! Endpoints:
//! - POST /api/v1/sessions                 - Open a session with an agent
//! - GET  /api/v1/sessions/{id}/messages   - Active messages, in prompt order
//! - POST /api/v1/sessions/{id}/interrupt  - Interrupt the live stream

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use uuid::Uuid;

use palaver_types::chat::{Message, Session};

use super::parse_uuid;
use crate::http::error::AppError;
use crate::http::extractors::caller::CallerId;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub agent_id: Uuid,
}

/// POST /api/v1/sessions
pub async fn create_session(
    State(state): State<AppState>,
    CallerId(caller_id): CallerId,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<ApiResponse<Session>>, AppError> {
    let start = Instant::now();
    let session = state.engine.create_session(body.agent_id, &caller_id).await?;
    Ok(Json(ApiResponse::success(session, start)))
}

/// GET /api/v1/sessions/{id}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<Message>>>, AppError> {
    let start = Instant::now();
    let sid = parse_uuid(&session_id)?;
    let messages = state.engine.active_messages(&sid).await?;
    Ok(Json(ApiResponse::success(messages, start)))
}

/// POST /api/v1/sessions/{id}/interrupt
///
/// Succeeds whether or not a stream was live; `interrupted` tells which.
pub async fn interrupt(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let sid = parse_uuid(&session_id)?;
    let interrupted = state.engine.interrupt(&sid);
    tracing::info!(session_id = %sid, interrupted, "Interrupt requested");
    Ok(Json(ApiResponse::success(
        serde_json::json!({ "session_id": sid, "interrupted": interrupted }),
        start,
    )))
}
