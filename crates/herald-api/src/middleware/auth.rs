//! Static API key authentication and per-client scoping.
//!
//! When an API key is configured, event routes require it either in the
//! `X-API-Key` header or as `Authorization: Bearer <key>`. Without a
//! configured key every request passes the key check.
//!
//! Every event route also requires an `X-Client-Id` header naming the
//! calling client. Handlers only expose events owned by that client.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use herald_core::NotificationEvent;
use tracing::warn;

use crate::{
    handlers::{is_valid_identifier, ErrorDetail, ErrorResponse},
    AppState,
};

/// Calling client, taken from the `X-Client-Id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientScope(pub String);

impl ClientScope {
    /// Whether `event` belongs to the calling client.
    pub fn owns(&self, event: &NotificationEvent) -> bool {
        event.client_id.as_deref() == Some(self.0.as_str())
    }
}

/// Extracts the presented API key, preferring `X-API-Key`.
fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-api-key").and_then(|v| v.to_str().ok()).or_else(|| {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
    })
}

/// Constant-time comparison of the presented key against the configured one.
fn keys_match(presented: &str, expected: &str) -> bool {
    use subtle::ConstantTimeEq;
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Errors raised by the API key and client scope checks.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    /// The provided API key does not match.
    InvalidApiKey,
    /// No API key was presented.
    MissingApiKey,
    /// `X-Client-Id` is absent or malformed.
    MissingClientId,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            Self::InvalidApiKey => "invalid API key",
            Self::MissingApiKey => "missing API key",
            Self::MissingClientId => "missing or malformed X-Client-Id header",
        };

        let body = ErrorResponse {
            error: ErrorDetail { code: "unauthorized".to_string(), message: message.to_string() },
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Axum middleware that authenticates requests against the configured key.
///
/// # Errors
///
/// Returns `AuthError` (401) when a key is configured and the request does
/// not present it.
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let presented = extract_api_key(req.headers()).ok_or(AuthError::MissingApiKey)?;
    if !keys_match(presented, expected) {
        warn!(path = %req.uri().path(), "rejected request with invalid API key");
        return Err(AuthError::InvalidApiKey);
    }

    Ok(next.run(req).await)
}

/// Axum middleware that attaches the caller's [`ClientScope`].
///
/// # Errors
///
/// Returns `AuthError::MissingClientId` (401) when `X-Client-Id` is absent
/// or not a valid identifier.
pub async fn client_scope_middleware(
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let client_id = req
        .headers()
        .get("x-client-id")
        .and_then(|v| v.to_str().ok())
        .filter(|id| is_valid_identifier(id))
        .map(str::to_string)
        .ok_or(AuthError::MissingClientId)?;

    req.extensions_mut().insert(ClientScope(client_id));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn extract_api_key_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("key-123"));

        assert_eq!(extract_api_key(&headers), Some("key-123"));
    }

    #[test]
    fn extract_api_key_from_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer key-123"));

        assert_eq!(extract_api_key(&headers), Some("key-123"));
    }

    #[test]
    fn extract_api_key_returns_none_without_headers() {
        assert_eq!(extract_api_key(&HeaderMap::new()), None);
    }

    #[test]
    fn scope_owns_only_its_client_events() {
        let scope = ClientScope("acme".to_string());
        let event = NotificationEvent::new("evt-1", "t", serde_json::json!({}), chrono::Utc::now());

        assert!(!scope.owns(&event));
        assert!(scope.owns(&event.clone().with_client("acme")));
        assert!(!scope.owns(&event.with_client("globex")));
    }

    #[test]
    fn key_comparison() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secret", "secreT"));
        assert!(!keys_match("secret", "secret-longer"));
    }
}
