//! Error types for the nodewatch-proto crate.

use thiserror::Error;

/// Result alias for protocol operations.
pub type ProtoResult<T> = Result<T, ProtoError>;

/// Errors that can occur while decoding or validating wire messages.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The payload was not valid JSON for the expected shape.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload parsed but violates a protocol rule.
    #[error("validation error: {0}")]
    Validation(String),

    /// An identity string was not 16 lowercase hex characters.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtoError::Validation("host_name is empty".to_string());
        assert_eq!(err.to_string(), "validation error: host_name is empty");

        let err = ProtoError::InvalidIdentity("xyz".to_string());
        assert_eq!(err.to_string(), "invalid identity: xyz");
    }

    #[test]
    fn test_from_serde_error() {
        let serde_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err = ProtoError::from(serde_err);
        assert!(matches!(err, ProtoError::Json(_)));
        assert!(err.to_string().starts_with("malformed payload"));
    }
}
