//! Error types for the collector.

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use nodewatch_proto::ProtoError;
use nodewatch_store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for collector operations.
pub type CollectorResult<T> = Result<T, CollectorError>;

/// Errors that can occur in the collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Failed to bind the listener. Fatal at startup.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// Missing or unknown shared key.
    #[error("missing or invalid key")]
    Unauthorized,

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A report from an agent could not be accepted.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// The history store rejected the call.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl CollectorError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::InvalidRequest(_)
            | Self::Protocol(_)
            | Self::Store(StoreError::InvalidSize { .. } | StoreError::Validation { .. }) => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            Self::Store(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Store(StoreError::Busy { .. }) => (StatusCode::SERVICE_UNAVAILABLE, "busy"),
            Self::BindFailed(_, _) | Self::Config(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

impl IntoResponse for CollectorError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status();

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"error":"internal_error","message":"failed to serialize error"}"#.to_string()
        });

        (status, [("content-type", "application/json")], json).into_response()
    }
}
