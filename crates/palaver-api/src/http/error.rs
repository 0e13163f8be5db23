//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use palaver_core::chat::assembler::AssemblyError;
use palaver_core::chat::engine::ChatError;
use palaver_types::error::RepositoryError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Errors from the conversation engine.
    Chat(ChatError),
    /// Malformed request (bad id, missing header).
    Validation(String),
}

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        AppError::Chat(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Chat(ChatError::Assembly(AssemblyError::NotFound(what))) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", format!("Not found: {what}"))
            }
            AppError::Chat(ChatError::Assembly(AssemblyError::Disabled(what))) => {
                (StatusCode::FORBIDDEN, "DISABLED", format!("Disabled: {what}"))
            }
            AppError::Chat(ChatError::Assembly(AssemblyError::Repository(RepositoryError::NotFound)))
            | AppError::Chat(ChatError::Repository(RepositoryError::NotFound)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", "Not found".to_string())
            }
            AppError::Chat(ChatError::Turn(message)) => {
                (StatusCode::BAD_GATEWAY, "TURN_FAILED", message.clone())
            }
            AppError::Chat(e @ ChatError::Interrupted) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERRUPTED", e.to_string())
            }
            AppError::Chat(e) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::warn!(code, error = %message, "Request failed");
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": uuid::Uuid::now_v7().to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
