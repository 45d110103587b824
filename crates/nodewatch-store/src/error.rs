//! Error types for the nodewatch-store crate.

use std::time::Duration;

use nodewatch_proto::{NodeIdentity, ProtoError};
use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by the store, queue and query helpers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The report was rejected before any state was touched.
    #[error("invalid report: {reason}")]
    Validation {
        /// Why the report was rejected.
        reason: String,
    },

    /// The store lock could not be taken within the configured timeout.
    /// Nothing was modified.
    #[error("store busy: {operation} gave up after {waited:?}")]
    Busy {
        /// The operation that gave up.
        operation: &'static str,
        /// How long it waited.
        waited: Duration,
    },

    /// A human-readable size string could not be parsed.
    #[error("invalid size {input:?}: {reason}")]
    InvalidSize {
        /// The rejected input.
        input: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// No record exists for the identity.
    #[error("node not found: {0}")]
    NotFound(NodeIdentity),
}

impl From<ProtoError> for StoreError {
    fn from(err: ProtoError) -> Self {
        Self::Validation {
            reason: err.to_string(),
        }
    }
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}
