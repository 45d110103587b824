//! Shared state for the collector.

use std::sync::Arc;
use std::time::Instant;

use nodewatch_proto::{NodeIdentity, Report};
use nodewatch_store::{HistoryStore, StagedReport, StagingKey, StagingQueue};
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::error::CollectorResult;

/// Pending reports keyed by observed address and host name.
pub type ReportQueue = StagingQueue<StagingKey, StagedReport>;

/// State shared by every connection handler, query handler and background
/// task of one collector.
#[derive(Debug)]
pub struct CollectorState {
    config: Arc<CollectorConfig>,
    store: HistoryStore,
    queue: Arc<ReportQueue>,
    start_time: Instant,
}

impl CollectorState {
    /// Create state with an empty store and queue sized by `config`.
    #[must_use]
    pub fn new(config: CollectorConfig) -> Self {
        let store = HistoryStore::new(config.retention).with_lock_timeout(config.lock_timeout);
        let queue = Arc::new(StagingQueue::with_order(config.drain_order));
        Self {
            config: Arc::new(config),
            store,
            queue,
            start_time: Instant::now(),
        }
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// The history store.
    #[must_use]
    pub const fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// The staging queue.
    #[must_use]
    pub fn queue(&self) -> Arc<ReportQueue> {
        Arc::clone(&self.queue)
    }

    /// Seconds since the state was created.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Accept one raw report from `ip`: decode, stamp the observed address
    /// and arrival time, validate and stage it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CollectorError::Protocol`] if the payload is malformed
    /// or fails validation. Nothing is staged in that case.
    pub fn stage(&self, payload: &str, ip: &str) -> CollectorResult<(StagingKey, NodeIdentity)> {
        let report = Report::from_json(payload)?.with_observed_ip(ip);
        report.validate()?;
        let identity = report.identity()?;
        let key = StagingKey::new(ip, report.host_name());

        if self.queue.push(key.clone(), StagedReport::now(report)) {
            debug!(node = %key, "coalesced pending report");
        }
        Ok((key, identity))
    }

    /// Fast path for a closed connection: take the node offline now.
    ///
    /// A report from this connection still pending in the queue is written
    /// later by the ingest writer without bringing the node back online.
    pub fn mark_disconnected(&self, key: &StagingKey, identity: &NodeIdentity) {
        match self.store.close_transport(identity) {
            Ok(Some(t)) => info!(identity = %identity, node = %key, event = %t.event, "node offline"),
            Ok(None) => debug!(identity = %identity, node = %key, "node already offline or not yet written"),
            Err(e) => warn!(identity = %identity, error = %e, "failed to mark node offline"),
        }
    }
}
