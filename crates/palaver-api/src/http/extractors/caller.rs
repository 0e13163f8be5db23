//! Caller identity extractor.
//!
//! The caller id comes from the `x-caller-id` header. Palaver does not
//! authenticate callers; whatever sits in front of it is expected to.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::http::error::AppError;

pub const CALLER_HEADER: &str = "x-caller-id";

/// The id of the account a request acts on behalf of.
#[derive(Debug, Clone)]
pub struct CallerId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CallerId(v.to_string()))
            .ok_or_else(|| AppError::Validation(format!("Missing '{CALLER_HEADER}' header")))
    }
}
