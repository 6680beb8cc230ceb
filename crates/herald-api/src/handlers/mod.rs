//! HTTP request handlers for the herald API.
//!
//! Handlers are grouped by functionality:
//! - `events` - listing, lookup and replay of notification events
//! - `health` - liveness check
//!
//! Failures are rendered as `{"error": {"code", "message"}}` where `code` is
//! the error category. Internal failures carry a generic message; the
//! detail is logged, not returned.

pub mod events;
pub mod health;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use herald_delivery::{DeliveryError, ErrorCategory};
use serde::Serialize;
use tracing::error;

pub use events::{get_event, list_events, replay_event};
pub use health::health_check;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details including code and message
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Machine-readable error kind
    pub code: String,
    /// Human-readable error description
    pub message: String,
}

/// Handler failure mapped onto an HTTP status.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed path or query input.
    BadRequest(String),
    /// Caller may not access the requested client's events.
    Forbidden(String),
    /// No event with the requested id.
    NotFound(String),
    /// Failure raised by the delivery layer.
    Delivery(DeliveryError),
}

/// Ids and client ids are limited to `[A-Za-z0-9_-]+`.
pub(crate) fn is_valid_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl From<DeliveryError> for ApiError {
    fn from(error: DeliveryError) -> Self {
        Self::Delivery(error)
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, String, String) {
        match self {
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "bad_request".to_string(), message.clone())
            },
            Self::Forbidden(message) => {
                (StatusCode::FORBIDDEN, "forbidden".to_string(), message.clone())
            },
            Self::NotFound(message) => {
                (StatusCode::NOT_FOUND, ErrorCategory::NotFound.to_string(), message.clone())
            },
            Self::Delivery(error) => {
                let category = error.category();
                let (status, message) = match category {
                    ErrorCategory::NotFound => (StatusCode::NOT_FOUND, error.to_string()),
                    ErrorCategory::InvalidState => (StatusCode::CONFLICT, error.to_string()),
                    ErrorCategory::Conflict => (
                        StatusCode::CONFLICT,
                        "event was modified concurrently, retry the request".to_string(),
                    ),
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string()),
                };
                (status, category.to_string(), message)
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        if status.is_server_error() {
            if let Self::Delivery(e) = &self {
                error!(category = %code, error = %e, "request failed");
            }
        }

        (status, Json(ErrorResponse { error: ErrorDetail { code, message } })).into_response()
    }
}
