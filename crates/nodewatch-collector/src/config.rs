//! Collector configuration.

use std::net::SocketAddr;
use std::time::Duration;

use nodewatch_store::DrainOrder;

use crate::error::{CollectorError, CollectorResult};

/// Key accepted when none is configured explicitly.
pub const DEFAULT_KEY: &str = "123456";

/// Default maximum WebSocket message size: 1MB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Configuration for the collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Address to bind the HTTP/WebSocket listener to.
    pub bind_addr: SocketAddr,
    /// Shared secrets an agent may present in the `key` query parameter.
    pub valid_keys: Vec<String>,
    /// How long samples are retained per node and GPU slot.
    pub retention: Duration,
    /// Silence after which the sweep takes a node offline.
    pub stale_timeout: Duration,
    /// Interval between liveness sweeps.
    pub sweep_interval: Duration,
    /// Writer sleep when the staging queue is empty.
    pub writer_idle: Duration,
    /// How long a store call waits for its lock before failing.
    pub lock_timeout: Duration,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
    /// Order the writer drains pending nodes in.
    pub drain_order: DrainOrder,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], 8000)))
    }
}

impl CollectorConfig {
    /// Create a configuration with default timings for `bind_addr`.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            valid_keys: vec![DEFAULT_KEY.to_string()],
            retention: Duration::from_secs(10),
            stale_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(2),
            writer_idle: Duration::from_millis(100),
            lock_timeout: nodewatch_store::history::DEFAULT_LOCK_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            drain_order: DrainOrder::Fifo,
        }
    }

    /// Replace the accepted keys.
    #[must_use]
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_keys = keys
            .into_iter()
            .map(Into::into)
            .filter(|k: &String| !k.trim().is_empty())
            .collect();
        self
    }

    /// Set the retention window.
    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the staleness timeout.
    #[must_use]
    pub const fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = timeout;
        self
    }

    /// Set the sweep interval.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the writer idle sleep.
    #[must_use]
    pub const fn with_writer_idle(mut self, idle: Duration) -> Self {
        self.writer_idle = idle;
        self
    }

    /// Set the store lock timeout.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the maximum message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the staging queue drain order.
    #[must_use]
    pub const fn with_drain_order(mut self, order: DrainOrder) -> Self {
        self.drain_order = order;
        self
    }

    /// Whether `key` is one of the accepted keys.
    #[must_use]
    pub fn accepts_key(&self, key: Option<&str>) -> bool {
        key.is_some_and(|key| self.valid_keys.iter().any(|k| k == key))
    }

    /// Check the configuration for values the collector cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Config`] describing the first problem found.
    pub fn validate(&self) -> CollectorResult<()> {
        if self.valid_keys.is_empty() {
            return Err(CollectorError::Config("at least one key is required".to_string()));
        }
        for (name, value) in [
            ("retention", self.retention),
            ("stale_timeout", self.stale_timeout),
            ("sweep_interval", self.sweep_interval),
            ("writer_idle", self.writer_idle),
        ] {
            if value.is_zero() {
                return Err(CollectorError::Config(format!("{name} must be non-zero")));
            }
        }
        if self.sweep_interval >= self.stale_timeout {
            return Err(CollectorError::Config(format!(
                "sweep_interval ({:?}) must be shorter than stale_timeout ({:?})",
                self.sweep_interval, self.stale_timeout
            )));
        }
        if self.max_message_size == 0 {
            return Err(CollectorError::Config("max_message_size must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_default_config() {
        let config = CollectorConfig::default();

        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.valid_keys, vec!["123456".to_string()]);
        assert_eq!(config.retention, Duration::from_secs(10));
        assert_eq!(config.stale_timeout, Duration::from_secs(10));
        assert_eq!(config.sweep_interval, Duration::from_secs(2));
        assert_eq!(config.writer_idle, Duration::from_millis(100));
        assert_eq!(config.drain_order, DrainOrder::Fifo);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000);
        let config = CollectorConfig::new(addr)
            .with_keys(["alpha", "beta"])
            .with_retention(Duration::from_secs(30))
            .with_stale_timeout(Duration::from_secs(20))
            .with_sweep_interval(Duration::from_secs(5))
            .with_max_message_size(4096)
            .with_drain_order(DrainOrder::Lifo);

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.valid_keys.len(), 2);
        assert_eq!(config.retention, Duration::from_secs(30));
        assert_eq!(config.max_message_size, 4096);
        assert_eq!(config.drain_order, DrainOrder::Lifo);
    }

    #[test]
    fn test_accepts_key() {
        let config = CollectorConfig::default().with_keys(["alpha", "beta"]);

        assert!(config.accepts_key(Some("alpha")));
        assert!(config.accepts_key(Some("beta")));
        assert!(!config.accepts_key(Some("gamma")));
        assert!(!config.accepts_key(Some("")));
        assert!(!config.accepts_key(None));
    }

    #[test]
    fn test_blank_keys_are_dropped() {
        let config = CollectorConfig::default().with_keys(["", "  ", "k"]);
        assert_eq!(config.valid_keys, vec!["k".to_string()]);
    }

    #[test]
    fn test_validate_rejects_empty_keys() {
        let config = CollectorConfig::default().with_keys(Vec::<String>::new());
        assert!(matches!(config.validate(), Err(CollectorError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = CollectorConfig::default().with_sweep_interval(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sweep_interval"));
    }

    #[test]
    fn test_validate_rejects_sweep_slower_than_timeout() {
        let config = CollectorConfig::default()
            .with_stale_timeout(Duration::from_secs(2))
            .with_sweep_interval(Duration::from_secs(2));
        assert!(config.validate().is_err());
    }
}
