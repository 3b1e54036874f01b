use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::services::origins::OriginError;

/// Failures surfaced by the cache engine.
///
/// Every variant reaches the caller with a distinguishing status; none are
/// retried or swallowed here.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("origin fetch failed: {message}")]
    OriginFetchFailed { status: Option<u16>, message: String },
    #[error("unexpected origin response: {0}")]
    OriginFormat(String),
    #[error("store write failed: {0}")]
    StoreWriteFailed(String),
    #[error("store read failed: {0}")]
    StoreReadFailed(String),
    #[error("object `{0}` not found")]
    NotFound(String),
}

impl From<OriginError> for CacheError {
    fn from(err: OriginError) -> Self {
        match err {
            OriginError::Upstream { status, message } => {
                CacheError::OriginFetchFailed { status, message }
            }
            OriginError::Format(message) => CacheError::OriginFormat(message),
            OriginError::Invalid(message) => CacheError::Validation(message),
        }
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        let status = match &err {
            CacheError::Validation(_) => StatusCode::BAD_REQUEST,
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::OriginFetchFailed { status, .. } => status
                .and_then(|code| StatusCode::from_u16(code).ok())
                .filter(|code| code.is_client_error() || code.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            CacheError::OriginFormat(_) => StatusCode::BAD_GATEWAY,
            CacheError::StoreWriteFailed(_) | CacheError::StoreReadFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::warn!("request failed with {}: {}", status, err);
        }

        AppError::new(status, err.to_string())
    }
}
