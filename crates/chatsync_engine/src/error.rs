//! Error types for the sync engine.

use chatsync_protocol::{ErrorBody, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations and user actions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The session is not (or no longer) authenticated.
    #[error("not authenticated")]
    Unauthenticated,

    /// The user may not perform this action (not the owner or creator).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The referenced entity no longer exists on the server.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was rejected before or by validation.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Network, socket or server-side failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server sent a body that could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The push connection could not be re-established.
    #[error("push connection lost after {attempts} reconnect attempts")]
    Disconnected {
        /// Reconnect attempts made before giving up.
        attempts: u32,
    },

    /// The engine was stopped.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps a non-success HTTP status and its body to an error.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let reason = ErrorBody::reason(body).unwrap_or_else(|| format!("HTTP error {status}"));
        match status {
            401 => Self::Unauthenticated,
            403 => Self::Forbidden(reason),
            404 | 410 => Self::NotFound(reason),
            400 | 422 => Self::ValidationFailed(reason),
            408 | 429 | 500..=599 => Self::transport_retryable(format!("{status}: {reason}")),
            _ => Self::transport_fatal(format!("{status}: {reason}")),
        }
    }

    /// Returns true if the caller may retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport { retryable: true, .. })
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(SyncError::from_status(401, b""), SyncError::Unauthenticated);
        assert!(matches!(
            SyncError::from_status(403, br#"{"error": "not the creator"}"#),
            SyncError::Forbidden(reason) if reason == "not the creator"
        ));
        assert!(matches!(SyncError::from_status(404, b""), SyncError::NotFound(_)));
        assert!(matches!(
            SyncError::from_status(400, br#"{"error": "Message content cannot be empty"}"#),
            SyncError::ValidationFailed(_)
        ));
        assert!(SyncError::from_status(503, b"").is_retryable());
        assert!(!SyncError::from_status(409, b"").is_retryable());
    }

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad certificate").is_retryable());
        assert!(!SyncError::Unauthenticated.is_retryable());
        assert!(!SyncError::ValidationFailed("empty".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::Disconnected { attempts: 5 };
        assert_eq!(
            err.to_string(),
            "push connection lost after 5 reconnect attempts"
        );
        let err = SyncError::from_status(500, b"");
        assert_eq!(err.to_string(), "transport error: 500: HTTP error 500");
    }
}
