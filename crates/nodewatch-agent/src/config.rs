//! Agent configuration.

use url::Url;

use crate::error::{AgentError, AgentResult};
use crate::link::{LinkConfig, endpoint_url};

/// Key sent when none is configured. Matches the collector's default.
pub const DEFAULT_KEY: &str = "123456";

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Collector address, `host:port` or a full `ws://` URL.
    pub server: String,
    /// Shared key presented to the collector.
    pub key: String,
    /// Host name override. Defaults to the machine's host name.
    pub host_name: Option<String>,
    /// Whether to read GPUs through nvidia-smi.
    pub gpus: bool,
    /// Link timing.
    pub link: LinkConfig,
}

impl AgentConfig {
    /// Create a configuration for the collector at `server`.
    #[must_use]
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            key: DEFAULT_KEY.to_string(),
            host_name: None,
            gpus: true,
            link: LinkConfig::default(),
        }
    }

    /// Set the shared key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Report under `host_name` instead of the machine's host name.
    #[must_use]
    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    /// Enable or disable GPU collection.
    #[must_use]
    pub const fn with_gpus(mut self, gpus: bool) -> Self {
        self.gpus = gpus;
        self
    }

    /// Set link timing.
    #[must_use]
    pub const fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// The collector WebSocket URL, key included.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if the server address is invalid.
    pub fn endpoint(&self) -> AgentResult<Url> {
        endpoint_url(&self.server, &self.key)
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] describing the first problem found.
    pub fn validate(&self) -> AgentResult<()> {
        if self.key.trim().is_empty() {
            return Err(AgentError::Config("key must not be empty".to_string()));
        }
        if self
            .host_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(AgentError::Config("host name must not be empty".to_string()));
        }
        let link = &self.link;
        if link.send_interval.is_zero() || link.receive_timeout.is_zero() || link.dial_timeout.is_zero() {
            return Err(AgentError::Config(
                "send interval, receive timeout and dial timeout must be non-zero".to_string(),
            ));
        }
        self.endpoint().map(|_| ())
    }
}
