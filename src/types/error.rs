//! Error types for Nexus
//!
//! Caller-facing board failures come in four kinds: an invalid board index,
//! a board still unreachable after the retry ceiling, the requesting peer
//! giving up, and the gateway shutting down. Connectivity failures stay
//! inside the connection actor and never reach callers.

use hyper::StatusCode;

/// Main error type for Nexus operations
#[derive(Debug, thiserror::Error)]
pub enum NexusError {
    #[error("Board index invalid: {board} of {count}")]
    InvalidBoard { board: usize, count: usize },

    #[error("Board {board} unreachable after {attempts} attempts")]
    Unreachable { board: usize, attempts: usize },

    #[error("Request connection closed")]
    PeerClosed,

    #[error("Boards closed")]
    Closed,

    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NexusError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidBoard { .. } => StatusCode::NOT_FOUND,
            Self::Unreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::PeerClosed => StatusCode::BAD_REQUEST,
            Self::Closed => StatusCode::SERVICE_UNAVAILABLE,
            Self::Connect(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<std::io::Error> for NexusError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<hyper::Error> for NexusError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

/// Result type alias for Nexus operations
pub type Result<T> = std::result::Result<T, NexusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors_map_to_distinct_statuses() {
        let invalid = NexusError::InvalidBoard { board: 9, count: 3 };
        assert_eq!(invalid.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(invalid.to_string(), "Board index invalid: 9 of 3");

        let unreachable = NexusError::Unreachable { board: 0, attempts: 3 };
        assert_eq!(unreachable.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        assert_eq!(NexusError::PeerClosed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(NexusError::Closed.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_into_status_code_and_body() {
        let (status, body) = NexusError::Unreachable { board: 2, attempts: 3 }
            .into_status_code_and_body();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "Board 2 unreachable after 3 attempts");
    }

    #[test]
    fn test_io_error_is_internal() {
        let err: NexusError = std::io::Error::other("boom").into();
        assert!(matches!(err, NexusError::Internal(_)));
    }
}
