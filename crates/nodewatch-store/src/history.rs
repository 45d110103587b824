//! Retained per-node history with windowed-max reads.
//!
//! The [`HistoryStore`] owns every [`NodeRecord`] and its CPU and GPU samples.
//! Each write prunes the node's samples that have fallen out of the retention
//! window, so at most one window's worth of rows exists per node and slot.
//! All mutation of one call happens under a single write guard: either the
//! whole upsert is visible to readers or none of it is.
//!
//! A closed transport leaves a fence at the close time. Reports received
//! at or before the fence still add samples but never bring the node back
//! online, so a report drained after its connection closed cannot undo the
//! disconnect.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use nodewatch_proto::{NodeIdentity, Report};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::liveness::{Liveness, LivenessEvent, Transition, is_stale};
use crate::types::{CpuPeak, CpuSample, GpuPeak, GpuSample, NodeRecord, NodeSummary, StagedReport};

/// Default retention window.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(10);

/// Default time a caller waits for the store lock before giving up.
///
/// The wait blocks the calling thread, async callers included, so it is kept
/// well under a scheduler tick.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct NodeEntry {
    record: NodeRecord,
    cpu: Vec<CpuSample>,
    gpus: BTreeMap<u32, Vec<GpuSample>>,
}

impl NodeEntry {
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        self.cpu.retain(|s| s.recorded_at > cutoff);
        for samples in self.gpus.values_mut() {
            samples.retain(|s| s.recorded_at > cutoff);
        }
        self.gpus.retain(|_, samples| !samples.is_empty());
    }

    fn summary(&self) -> NodeSummary {
        NodeSummary {
            record: self.record.clone(),
            cpu: CpuPeak::over(&self.cpu),
            gpus: self.gpus.values().filter_map(|s| GpuPeak::over(s)).collect(),
        }
    }
}

#[derive(Debug, Default)]
struct Nodes {
    /// Identities in first-seen order.
    order: Vec<NodeIdentity>,
    entries: HashMap<NodeIdentity, NodeEntry>,
    /// Latest transport close per identity, including ones never written.
    closed: HashMap<NodeIdentity, DateTime<Utc>>,
}

impl Nodes {
    fn received_before_close(&self, identity: &NodeIdentity, received_at: DateTime<Utc>) -> bool {
        self.closed
            .get(identity)
            .is_some_and(|closed_at| received_at <= *closed_at)
    }
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// The node written.
    pub identity: NodeIdentity,
    /// Whether the record was created by this call.
    pub created: bool,
    /// Liveness change caused by this call, if any.
    pub transition: Option<Transition>,
    /// The report was received before the node's last transport close, so
    /// liveness was left alone.
    pub after_close: bool,
}

/// Thread-safe retained history of node telemetry.
///
/// Cloning shares the underlying data. Every call takes a `parking_lot`
/// lock and, when contended, blocks the calling thread for up to the lock
/// timeout before returning [`StoreError::Busy`]. Critical sections are
/// short and never await, which keeps this safe to call from async tasks.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    retention: TimeDelta,
    lock_timeout: Duration,
    nodes: Arc<RwLock<Nodes>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl HistoryStore {
    /// Create a store that keeps samples newer than `retention`.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            retention: to_delta(retention),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            nodes: Arc::new(RwLock::new(Nodes::default())),
        }
    }

    /// Set how long calls wait for the lock before returning
    /// [`StoreError::Busy`].
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Retention window.
    #[must_use]
    pub const fn retention(&self) -> TimeDelta {
        self.retention
    }

    /// Write a report received now.
    ///
    /// # Errors
    ///
    /// See [`HistoryStore::upsert_at`].
    pub fn upsert(&self, report: &Report) -> StoreResult<UpsertOutcome> {
        self.upsert_at(report, Utc::now())
    }

    /// Write a report as if received and written at `now`.
    ///
    /// # Errors
    ///
    /// See [`HistoryStore::upsert_staged_at`].
    pub fn upsert_at(&self, report: &Report, now: DateTime<Utc>) -> StoreResult<UpsertOutcome> {
        self.write_report(report, now, now)
    }

    /// Write a staged report now.
    ///
    /// # Errors
    ///
    /// See [`HistoryStore::upsert_staged_at`].
    pub fn upsert_staged(&self, staged: &StagedReport) -> StoreResult<UpsertOutcome> {
        self.upsert_staged_at(staged, Utc::now())
    }

    /// Write a staged report at `now`.
    ///
    /// Creates the node record if absent, otherwise refreshes its address and
    /// `last_update`. Appends one CPU sample and one sample per reported GPU,
    /// and drops every sample of the node recorded at or before
    /// `now - retention`. The node goes online unless the report was received
    /// at or before its last transport close.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] if the report is malformed or has no
    /// address, and [`StoreError::Busy`] if the lock timed out. In both cases
    /// the store is unchanged.
    pub fn upsert_staged_at(&self, staged: &StagedReport, now: DateTime<Utc>) -> StoreResult<UpsertOutcome> {
        self.write_report(&staged.report, staged.received_at, now)
    }

    #[allow(clippy::significant_drop_tightening)] // One guard spans the whole upsert
    fn write_report(
        &self,
        report: &Report,
        received_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<UpsertOutcome> {
        report.validate()?;
        let identity = report.identity()?;
        let ip = report.ip().unwrap_or_default().to_string();

        let cpu = CpuSample {
            percent: report.cpu_info.cpu_percent,
            core_count: report.cpu_info.cpu_count,
            recorded_at: now,
        };
        let gpus: Vec<GpuSample> = report
            .gpu_info
            .iter()
            .map(|gpu| GpuSample::from_wire(&identity, gpu, now))
            .collect();
        let cutoff = self.cutoff(now);

        let mut nodes = self.write("upsert")?;
        let after_close = nodes.received_before_close(&identity, received_at);
        let Nodes { order, entries, .. } = &mut *nodes;

        let mut created = false;
        let entry = entries.entry(identity).or_insert_with(|| {
            created = true;
            order.push(identity);
            NodeEntry {
                record: NodeRecord {
                    identity,
                    host_name: report.host_name().to_string(),
                    ip: ip.clone(),
                    last_update: now,
                    liveness: if after_close {
                        Liveness::Offline
                    } else {
                        Liveness::Online
                    },
                },
                cpu: Vec::new(),
                gpus: BTreeMap::new(),
            }
        });

        let transition = if after_close {
            None
        } else {
            let transition = Transition::apply(
                identity,
                entry.record.liveness,
                LivenessEvent::SampleIngested,
            );
            entry.record.liveness = entry.record.liveness.next(LivenessEvent::SampleIngested);
            transition
        };
        entry.record.ip = ip;
        entry.record.last_update = now;

        entry.prune(cutoff);
        entry.cpu.push(cpu);
        for sample in gpus {
            entry.gpus.entry(sample.slot_index).or_default().push(sample);
        }

        debug!(
            identity = %identity,
            created,
            after_close,
            cpu_samples = entry.cpu.len(),
            gpu_slots = entry.gpus.len(),
            "upserted report"
        );

        Ok(UpsertOutcome {
            identity,
            created,
            transition,
            after_close,
        })
    }

    /// Every node with its windowed-max readings, in first-seen order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Busy`] if the lock timed out.
    pub fn list_all(&self) -> StoreResult<Vec<NodeSummary>> {
        let nodes = self.read("list_all")?;
        Ok(nodes
            .order
            .iter()
            .filter_map(|id| nodes.entries.get(id))
            .map(NodeEntry::summary)
            .collect())
    }

    /// One node with its windowed-max readings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Busy`] if the lock timed out.
    pub fn get(&self, identity: &NodeIdentity) -> StoreResult<Option<NodeSummary>> {
        let nodes = self.read("get")?;
        Ok(nodes.entries.get(identity).map(NodeEntry::summary))
    }

    /// Retained CPU samples of a node, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown node and
    /// [`StoreError::Busy`] if the lock timed out.
    pub fn cpu_samples(&self, identity: &NodeIdentity) -> StoreResult<Vec<CpuSample>> {
        let nodes = self.read("cpu_samples")?;
        nodes
            .entries
            .get(identity)
            .map(|e| e.cpu.clone())
            .ok_or(StoreError::NotFound(*identity))
    }

    /// Retained samples for GPU `index` of a node, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown node and
    /// [`StoreError::Busy`] if the lock timed out.
    pub fn gpu_samples(&self, identity: &NodeIdentity, index: u32) -> StoreResult<Vec<GpuSample>> {
        let nodes = self.read("gpu_samples")?;
        let entry = nodes
            .entries
            .get(identity)
            .ok_or(StoreError::NotFound(*identity))?;
        Ok(entry.gpus.get(&index).cloned().unwrap_or_default())
    }

    /// Take a node offline without touching its history or `last_update`.
    ///
    /// Returns the transition if the node was online.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown node and
    /// [`StoreError::Busy`] if the lock timed out.
    pub fn set_offline(&self, identity: &NodeIdentity) -> StoreResult<Option<Transition>> {
        self.apply_event(identity, LivenessEvent::TransportClosed)
    }

    /// Record that the node's transport closed now and take it offline.
    ///
    /// # Errors
    ///
    /// See [`HistoryStore::close_transport_at`].
    pub fn close_transport(&self, identity: &NodeIdentity) -> StoreResult<Option<Transition>> {
        self.close_transport_at(identity, Utc::now())
    }

    /// Record that the node's transport closed at `closed_at` and take it
    /// offline.
    ///
    /// The fence is kept even for a node never written, so a report received
    /// before the close and drained later creates the node offline. Returns
    /// the transition if the node was online, `None` if it was offline or
    /// unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Busy`] if the lock timed out; nothing changes.
    pub fn close_transport_at(
        &self,
        identity: &NodeIdentity,
        closed_at: DateTime<Utc>,
    ) -> StoreResult<Option<Transition>> {
        let mut nodes = self.write("close_transport")?;
        let fence = nodes.closed.entry(*identity).or_insert(closed_at);
        *fence = (*fence).max(closed_at);

        let Some(entry) = nodes.entries.get_mut(identity) else {
            return Ok(None);
        };
        let event = LivenessEvent::TransportClosed;
        let transition = Transition::apply(*identity, entry.record.liveness, event);
        entry.record.liveness = entry.record.liveness.next(event);
        Ok(transition)
    }

    /// Feed an external liveness event for one node into the state machine.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown node and
    /// [`StoreError::Busy`] if the lock timed out.
    pub fn apply_event(
        &self,
        identity: &NodeIdentity,
        event: LivenessEvent,
    ) -> StoreResult<Option<Transition>> {
        let mut nodes = self.write("apply_event")?;
        let entry = nodes
            .entries
            .get_mut(identity)
            .ok_or(StoreError::NotFound(*identity))?;
        let transition = Transition::apply(*identity, entry.record.liveness, event);
        entry.record.liveness = entry.record.liveness.next(event);
        Ok(transition)
    }

    /// Take offline every online node whose last update is older than
    /// `timeout`, as of now.
    ///
    /// # Errors
    ///
    /// See [`HistoryStore::sweep_stale_at`].
    pub fn sweep_stale(&self, timeout: Duration) -> StoreResult<Vec<Transition>> {
        self.sweep_stale_at(Utc::now(), timeout)
    }

    /// Take offline every online node with `now - last_update > timeout`.
    ///
    /// The sweep is one critical section, so a concurrent reader sees either
    /// none or all of its transitions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Busy`] if the lock timed out; nothing changes.
    pub fn sweep_stale_at(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> StoreResult<Vec<Transition>> {
        let timeout = to_delta(timeout);
        let mut nodes = self.write("sweep")?;
        let Nodes { order, entries, .. } = &mut *nodes;

        let mut transitions = Vec::new();
        for id in order.iter() {
            let Some(entry) = entries.get_mut(id) else {
                continue;
            };
            let record = &mut entry.record;
            if !record.is_online() || !is_stale(record.last_update, now, timeout) {
                continue;
            }
            if let Some(t) = Transition::apply(*id, record.liveness, LivenessEvent::StalenessExpired) {
                record.liveness = t.to;
                transitions.push(t);
            }
        }
        Ok(transitions)
    }

    /// Number of known nodes and how many of them are online.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Busy`] if the lock timed out.
    pub fn counts(&self) -> StoreResult<(usize, usize)> {
        let nodes = self.read("counts")?;
        let online = nodes
            .entries
            .values()
            .filter(|e| e.record.is_online())
            .count();
        Ok((nodes.entries.len(), online))
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn read(&self, operation: &'static str) -> StoreResult<RwLockReadGuard<'_, Nodes>> {
        self.nodes
            .try_read_for(self.lock_timeout)
            .ok_or(StoreError::Busy {
                operation,
                waited: self.lock_timeout,
            })
    }

    fn write(&self, operation: &'static str) -> StoreResult<RwLockWriteGuard<'_, Nodes>> {
        self.nodes
            .try_write_for(self.lock_timeout)
            .ok_or(StoreError::Busy {
                operation,
                waited: self.lock_timeout,
            })
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
