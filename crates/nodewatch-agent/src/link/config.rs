//! Link timing and endpoint configuration.

use std::time::Duration;

use url::Url;

use crate::error::{AgentError, AgentResult, LinkError};

/// Timing of the collector link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Interval between reports.
    pub send_interval: Duration,
    /// Longest wait for any inbound frame before the link is presumed dead.
    pub receive_timeout: Duration,
    /// Pause after a failed dial or a receive timeout.
    pub retry_backoff: Duration,
    /// Pause after the collector rejected the key.
    pub auth_backoff: Duration,
    /// Longest a single dial may take.
    pub dial_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_millis(200),
            receive_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(1),
            auth_backoff: Duration::from_secs(30),
            dial_timeout: Duration::from_secs(10),
        }
    }
}

impl LinkConfig {
    /// Set the report interval.
    #[must_use]
    pub const fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }

    /// Set the receive timeout.
    #[must_use]
    pub const fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Set the retry backoff.
    #[must_use]
    pub const fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the backoff after an auth rejection.
    #[must_use]
    pub const fn with_auth_backoff(mut self, backoff: Duration) -> Self {
        self.auth_backoff = backoff;
        self
    }

    /// Set the dial timeout.
    #[must_use]
    pub const fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// How long to wait before retrying after `err`.
    #[must_use]
    pub const fn backoff_for(&self, err: &LinkError) -> Duration {
        if err.is_auth() {
            self.auth_backoff
        } else {
            self.retry_backoff
        }
    }
}

/// Build the collector WebSocket URL for `server` and `key`.
///
/// `server` is either `host:port`, which becomes `ws://host:port/ws`, or a
/// full `ws://` / `wss://` URL used as is. The key is percent-encoded into
/// the `key` query parameter.
///
/// # Errors
///
/// Returns [`AgentError::Config`] if the result is not a valid WebSocket URL.
pub fn endpoint_url(server: &str, key: &str) -> AgentResult<Url> {
    let server = server.trim();
    if server.is_empty() {
        return Err(AgentError::Config("collector address is empty".to_string()));
    }

    let raw = if server.starts_with("ws://") || server.starts_with("wss://") {
        server.to_string()
    } else {
        format!("ws://{}/ws", server.trim_end_matches('/'))
    };

    let mut url =
        Url::parse(&raw).map_err(|e| AgentError::Config(format!("invalid collector URL {raw}: {e}")))?;
    if url.host_str().is_none() {
        return Err(AgentError::Config(format!("collector URL has no host: {raw}")));
    }
    url.query_pairs_mut().append_pair("key", key);
    Ok(url)
}
