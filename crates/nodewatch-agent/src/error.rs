//! Error types for the agent.

use std::time::Duration;

use nodewatch_proto::ProtoError;
use thiserror::Error;

/// Result alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Result alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Transport-level failures of the collector link. All of them are
/// recovered by reconnecting.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Could not open the connection.
    #[error("dial failed: {0}")]
    Dial(String),

    /// The dial did not finish in time.
    #[error("dial timed out after {0:?}")]
    DialTimeout(Duration),

    /// The collector refused the shared key.
    #[error("collector rejected the key (HTTP {status})")]
    Auth {
        /// HTTP status of the refused handshake.
        status: u16,
    },

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The collector closed the connection.
    #[error("connection closed by collector")]
    Closed,
}

impl LinkError {
    /// Whether the collector refused our credentials.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Errors that can occur in agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Link failure.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Reading local metrics failed.
    #[error("sampling failed: {0}")]
    Sampling(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Encoding a report failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
