//! Background liveness sweep.

use std::time::Duration;

use nodewatch_store::{HistoryStore, StoreResult, Transition};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::CollectorState;

/// Periodically takes stale nodes offline.
///
/// This is the slow path; connection handlers take a node offline
/// immediately when they see its socket close.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    store: HistoryStore,
    interval: Duration,
    stale_timeout: Duration,
}

impl LivenessMonitor {
    /// Create a monitor over an explicit store.
    #[must_use]
    pub const fn new(store: HistoryStore, interval: Duration, stale_timeout: Duration) -> Self {
        Self {
            store,
            interval,
            stale_timeout,
        }
    }

    /// Create the monitor for a collector.
    #[must_use]
    pub fn for_state(state: &CollectorState) -> Self {
        let config = state.config();
        Self::new(state.store().clone(), config.sweep_interval, config.stale_timeout)
    }

    /// Run one sweep now.
    ///
    /// # Errors
    ///
    /// Returns the store error if the sweep could not take the lock.
    pub fn sweep_once(&self) -> StoreResult<Vec<Transition>> {
        let transitions = self.store.sweep_stale(self.stale_timeout)?;
        for t in &transitions {
            info!(identity = %t.identity, event = %t.event, "node offline");
        }
        Ok(transitions)
    }

    /// Sweep every interval until `cancel` fires. A failed sweep is logged
    /// and retried on the next tick.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(interval = ?self.interval, timeout = ?self.stale_timeout, "liveness monitor started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once() {
                        warn!(error = %e, "liveness sweep failed");
                    }
                }
            }
        }
        debug!("liveness monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorConfig;
    use nodewatch_proto::{CpuInfo, NodeIdentity, Report};
    use chrono::{TimeDelta, Utc};

    fn make_report(host: &str) -> Report {
        Report::new(
            host,
            CpuInfo {
                cpu_percent: 1.0,
                cpu_count: 4,
            },
            vec![],
        )
        .with_observed_ip("10.0.0.7")
    }

    #[test]
    fn test_sweep_once_applies_timeout() {
        let store = HistoryStore::default();
        let now = Utc::now();
        store
            .upsert_at(&make_report("stale"), now - TimeDelta::seconds(11))
            .unwrap();
        store
            .upsert_at(&make_report("fresh"), now - TimeDelta::seconds(9))
            .unwrap();

        let monitor = LivenessMonitor::new(store.clone(), Duration::from_secs(2), Duration::from_secs(10));
        let transitions = monitor.sweep_once().unwrap();

        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].identity, NodeIdentity::derive("stale", "10.0.0.7"));

        let fresh = store
            .get(&NodeIdentity::derive("fresh", "10.0.0.7"))
            .unwrap()
            .unwrap();
        assert!(fresh.record.is_online());
    }

    #[tokio::test]
    async fn test_run_sweeps_on_interval() {
        let state = CollectorState::new(
            CollectorConfig::default()
                .with_stale_timeout(Duration::from_millis(50))
                .with_sweep_interval(Duration::from_millis(10)),
        );
        let identity = state
            .store()
            .upsert(&make_report("quiet"))
            .unwrap()
            .identity;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(LivenessMonitor::for_state(&state).run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let record = state.store().get(&identity).unwrap().unwrap().record;
        assert!(!record.is_online());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
