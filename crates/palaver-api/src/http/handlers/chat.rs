//! Chat endpoints.
//!
//! - POST /api/v1/sessions/{id}/chat/stream  - SSE, one event per chat event
//! - POST /api/v1/sessions/{id}/chat         - single JSON reply
//!
//! SSE event names are the chat event kinds (`partial_text`, `end_of_text`,
//! `tool_invoked`, `sub_agent_call_started`, `error`, ...); each event's data
//! is the JSON-encoded chat event. The SSE response ends when the turn's
//! connection completes.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use serde::Deserialize;

use palaver_core::chat::transport::Frame;
use palaver_core::chat::turn::{ChatReply, ChatRequest};

use super::parse_uuid;
use crate::http::error::AppError;
use crate::http::extractors::caller::CallerId;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for both chat endpoints.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub file_refs: Vec<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

impl ChatBody {
    fn into_request(self, session_id: uuid::Uuid) -> ChatRequest {
        ChatRequest {
            session_id,
            message: self.message,
            file_refs: self.file_refs,
            model_id: self.model_id,
        }
    }
}

/// POST /api/v1/sessions/{id}/chat/stream
///
/// Resolution failures (unknown session, disabled agent) are returned as a
/// normal error response before the event stream opens.
pub async fn stream_chat(
    State(state): State<AppState>,
    CallerId(caller_id): CallerId,
    Path(session_id): Path<String>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let sid = parse_uuid(&session_id)?;
    let mut frames = state.engine.chat(body.into_request(sid), &caller_id).await?;

    let sse_stream = async_stream::stream! {
        while let Some(frame) = frames.recv().await {
            match frame {
                Frame::Event(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok::<_, Infallible>(Event::default().event(event.kind.as_str()).data(data));
                }
                Frame::Complete => break,
            }
        }
    };

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// POST /api/v1/sessions/{id}/chat
pub async fn chat(
    State(state): State<AppState>,
    CallerId(caller_id): CallerId,
    Path(session_id): Path<String>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ApiResponse<ChatReply>>, AppError> {
    let start = Instant::now();
    let sid = parse_uuid(&session_id)?;
    let reply = state.engine.chat_sync(body.into_request(sid), &caller_id).await?;
    Ok(Json(ApiResponse::success(reply, start)))
}
