//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or encoding wire data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A timestamp could not be parsed.
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The body did not have the expected shape.
    #[error("invalid structure: {0}")]
    InvalidStructure(String),
}

impl ProtocolError {
    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::InvalidTimestamp("yesterday".into());
        assert_eq!(err.to_string(), "invalid timestamp: \"yesterday\"");

        let err = ProtocolError::invalid_structure("expected array");
        assert!(err.to_string().contains("expected array"));
    }
}
