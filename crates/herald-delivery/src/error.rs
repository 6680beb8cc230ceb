//! Error types for delivery, replay and scanning operations.
//!
//! Sender-side variants describe why a single webhook call failed; they are
//! folded into attempt records by the orchestrator and never escape it.
//! The remaining variants reach callers of the replay and query services
//! and carry an [`ErrorCategory`] the HTTP layer maps onto status codes.

use std::fmt;

use herald_core::{CoreError, DeliveryStatus, EventId};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for webhook delivery operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Milliseconds before the request timed out
        timeout_ms: u64,
    },

    /// HTTP response indicated client error (4xx).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// HTTP response indicated server error (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// HTTP response outside the 2xx, 4xx and 5xx ranges, such as an
    /// unfollowed redirect.
    #[error("unexpected status: HTTP {status_code}")]
    UnexpectedStatus {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Operation not allowed from the event's current status.
    #[error("only failed events may be replayed: event {event_id} is {status}")]
    InvalidStateTransition {
        /// Event the operation targeted
        event_id: EventId,
        /// Status the event was found in
        status: DeliveryStatus,
    },

    /// Event store failure, including lost update races.
    #[error("persistence error: {0}")]
    Persistence(#[from] CoreError),

    /// Invalid sender or service configuration.
    #[error("invalid configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a client error from HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates an error for a status that is neither success nor failure.
    pub fn unexpected_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::UnexpectedStatus { status_code, body: body.into() }
    }

    /// Creates an invalid state transition error.
    pub fn invalid_state(event_id: EventId, status: DeliveryStatus) -> Self {
        Self::InvalidStateTransition { event_id, status }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// HTTP status returned by the receiver, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientError { status_code, .. }
            | Self::ServerError { status_code, .. }
            | Self::UnexpectedStatus { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Category used for logging and for choosing the HTTP status at the
    /// API boundary.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from(self)
    }
}

/// Category of delivery error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Network,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx).
    Server,
    /// HTTP statuses outside the success and error ranges.
    UnexpectedStatus,
    /// Requested event does not exist.
    NotFound,
    /// Operation rejected by the event's status.
    InvalidState,
    /// Concurrent modification detected by the store.
    Conflict,
    /// Storage failures.
    Persistence,
    /// Configuration problems.
    Configuration,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::ClientError { .. } => Self::Client,
            DeliveryError::ServerError { .. } => Self::Server,
            DeliveryError::UnexpectedStatus { .. } => Self::UnexpectedStatus,
            DeliveryError::InvalidStateTransition { .. } => Self::InvalidState,
            DeliveryError::Persistence(CoreError::NotFound(_)) => Self::NotFound,
            DeliveryError::Persistence(CoreError::Conflict(_)) => Self::Conflict,
            DeliveryError::Persistence(_) => Self::Persistence,
            DeliveryError::ConfigurationError { .. } => Self::Configuration,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::UnexpectedStatus => write!(f, "unexpected_status"),
            Self::NotFound => write!(f, "not_found"),
            Self::InvalidState => write!(f, "invalid_state"),
            Self::Conflict => write!(f, "conflict"),
            Self::Persistence => write!(f, "persistence"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(DeliveryError::network("test").category(), ErrorCategory::Network);
        assert_eq!(DeliveryError::client_error(400, "").category(), ErrorCategory::Client);
        assert_eq!(
            DeliveryError::unexpected_status(304, "").category(),
            ErrorCategory::UnexpectedStatus
        );
        assert_eq!(
            DeliveryError::invalid_state(EventId::from("e"), DeliveryStatus::Completed).category(),
            ErrorCategory::InvalidState
        );
        assert_eq!(
            DeliveryError::from(CoreError::Conflict("stale".into())).category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            DeliveryError::from(CoreError::Database("down".into())).category(),
            ErrorCategory::Persistence
        );
    }

    #[test]
    fn error_display_format() {
        assert_eq!(DeliveryError::timeout(5000).to_string(), "request timeout after 5000ms");
        assert_eq!(
            DeliveryError::unexpected_status(304, "").to_string(),
            "unexpected status: HTTP 304"
        );

        let replay = DeliveryError::invalid_state(EventId::from("evt-1"), DeliveryStatus::Completed);
        assert_eq!(
            replay.to_string(),
            "only failed events may be replayed: event evt-1 is completed"
        );
        assert_eq!(ErrorCategory::InvalidState.to_string(), "invalid_state");
    }

    #[test]
    fn status_code_only_for_http_responses() {
        assert_eq!(DeliveryError::server_error(503, "").status_code(), Some(503));
        assert_eq!(DeliveryError::unexpected_status(302, "").status_code(), Some(302));
        assert_eq!(DeliveryError::timeout(1).status_code(), None);
    }
}
