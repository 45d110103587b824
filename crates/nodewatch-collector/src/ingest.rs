//! Single writer draining the staging queue into the history store.

use std::sync::Arc;
use std::time::Duration;

use nodewatch_store::{HistoryStore, StoreResult, UpsertOutcome};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::{CollectorState, ReportQueue};

/// Drains pending reports one at a time, in queue order, into the store.
///
/// There is exactly one writer per collector, so reports from one node are
/// applied in the order they were staged.
#[derive(Debug, Clone)]
pub struct IngestWriter {
    queue: Arc<ReportQueue>,
    store: HistoryStore,
    idle: Duration,
}

impl IngestWriter {
    /// Create a writer over explicit parts.
    #[must_use]
    pub const fn new(queue: Arc<ReportQueue>, store: HistoryStore, idle: Duration) -> Self {
        Self { queue, store, idle }
    }

    /// Create the writer for a collector.
    #[must_use]
    pub fn for_state(state: &CollectorState) -> Self {
        Self::new(state.queue(), state.store().clone(), state.config().writer_idle)
    }

    /// Persist one pending report.
    ///
    /// Returns `None` when nothing was pending.
    pub fn drain_one(&self) -> Option<StoreResult<UpsertOutcome>> {
        let (key, staged) = self.queue.pop()?;
        let result = self.store.upsert_staged(&staged);
        match &result {
            Ok(outcome) => {
                if outcome.after_close {
                    debug!(identity = %outcome.identity, node = %key, "persisted report received before disconnect");
                } else if outcome.created {
                    info!(identity = %outcome.identity, node = %key, "new node registered");
                } else if let Some(t) = outcome.transition {
                    info!(identity = %t.identity, node = %key, from = %t.from, to = %t.to, "node back online");
                }
            }
            // The report is dropped; the node's next one will be staged anew.
            Err(e) => warn!(node = %key, error = %e, "failed to persist report"),
        }
        Some(result)
    }

    /// Run until `cancel` fires, sleeping for the idle interval whenever the
    /// queue is empty.
    pub async fn run(self, cancel: CancellationToken) {
        debug!(idle = ?self.idle, "ingest writer started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if self.drain_one().is_some() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.idle) => {}
            }
        }
        debug!("ingest writer stopped");
    }
}
