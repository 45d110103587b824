//! Records, samples and windowed-max summaries held by the history store.

use chrono::{DateTime, Utc};
use nodewatch_proto::{GpuInfo, GpuSlotId, NodeIdentity, Report};

use crate::liveness::Liveness;

/// A report waiting to be written, stamped with when the collector received
/// it.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedReport {
    /// The report, observed address already applied.
    pub report: Report,
    /// Arrival time at the collector.
    pub received_at: DateTime<Utc>,
}

impl StagedReport {
    /// Stamp `report` as received now.
    #[must_use]
    pub fn now(report: Report) -> Self {
        Self::at(report, Utc::now())
    }

    /// Stamp `report` as received at `received_at`.
    #[must_use]
    pub const fn at(report: Report, received_at: DateTime<Utc>) -> Self {
        Self {
            report,
            received_at,
        }
    }
}

/// One node as known to the store. Records are never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Derived key.
    pub identity: NodeIdentity,
    /// Reported host name.
    pub host_name: String,
    /// Observed address.
    pub ip: String,
    /// Time of the last ingested report.
    pub last_update: DateTime<Utc>,
    /// Current liveness.
    pub liveness: Liveness,
}

impl NodeRecord {
    /// Whether the node is online.
    #[must_use]
    pub const fn is_online(&self) -> bool {
        self.liveness.is_online()
    }
}

/// CPU reading retained for one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuSample {
    /// Utilization in percent.
    pub percent: f64,
    /// Logical core count.
    pub core_count: u32,
    /// When the store recorded it.
    pub recorded_at: DateTime<Utc>,
}

/// GPU reading retained for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuSample {
    /// Slot the reading belongs to.
    pub slot_id: GpuSlotId,
    /// Device index on the node.
    pub slot_index: u32,
    /// Fan speed in percent.
    pub fan_speed: Option<u32>,
    /// Temperature in degrees Celsius.
    pub temperature: u32,
    /// Utilization in percent.
    pub utilization: u32,
    /// Total memory in bytes.
    pub memory_total: u64,
    /// Used memory in bytes.
    pub memory_used: u64,
    /// Free memory in bytes.
    pub memory_free: u64,
    /// When the store recorded it.
    pub recorded_at: DateTime<Utc>,
}

impl GpuSample {
    pub(crate) fn from_wire(node: &NodeIdentity, gpu: &GpuInfo, recorded_at: DateTime<Utc>) -> Self {
        Self {
            slot_id: GpuSlotId::derive(node, gpu.index),
            slot_index: gpu.index,
            fan_speed: gpu.fan_speed,
            temperature: gpu.temperature,
            utilization: gpu.gpu_utilization,
            memory_total: gpu.memory_total,
            memory_used: gpu.memory_used,
            memory_free: gpu.memory_free,
            recorded_at,
        }
    }
}

/// Windowed maximum over a node's CPU samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuPeak {
    /// Highest utilization in the window.
    pub cpu_percent: f64,
    /// Highest core count in the window.
    pub cpu_count: u32,
}

impl CpuPeak {
    /// Fold samples into their field-wise maximum, `None` if there are none.
    #[must_use]
    pub fn over(samples: &[CpuSample]) -> Option<Self> {
        let first = samples.first()?;
        Some(samples.iter().skip(1).fold(
            Self {
                cpu_percent: first.percent,
                cpu_count: first.core_count,
            },
            |peak, s| Self {
                cpu_percent: peak.cpu_percent.max(s.percent),
                cpu_count: peak.cpu_count.max(s.core_count),
            },
        ))
    }
}

/// Windowed maximum over one GPU slot's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuPeak {
    /// Slot id.
    pub slot_id: GpuSlotId,
    /// Device index on the node.
    pub index: u32,
    /// Highest fan speed, if any sample reported one.
    pub fan_speed: Option<u32>,
    /// Highest temperature.
    pub temperature: u32,
    /// Highest utilization.
    pub gpu_utilization: u32,
    /// Highest total memory.
    pub memory_total: u64,
    /// Highest used memory.
    pub memory_used: u64,
    /// Highest free memory.
    pub memory_free: u64,
}

impl GpuPeak {
    /// Fold one slot's samples into their field-wise maximum.
    #[must_use]
    pub fn over(samples: &[GpuSample]) -> Option<Self> {
        let first = samples.first()?;
        let init = Self {
            slot_id: first.slot_id,
            index: first.slot_index,
            fan_speed: first.fan_speed,
            temperature: first.temperature,
            gpu_utilization: first.utilization,
            memory_total: first.memory_total,
            memory_used: first.memory_used,
            memory_free: first.memory_free,
        };
        Some(samples.iter().skip(1).fold(init, |peak, s| Self {
            fan_speed: peak.fan_speed.max(s.fan_speed),
            temperature: peak.temperature.max(s.temperature),
            gpu_utilization: peak.gpu_utilization.max(s.utilization),
            memory_total: peak.memory_total.max(s.memory_total),
            memory_used: peak.memory_used.max(s.memory_used),
            memory_free: peak.memory_free.max(s.memory_free),
            ..peak
        }))
    }
}

/// A node record joined with its windowed-max readings.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSummary {
    /// The node.
    pub record: NodeRecord,
    /// CPU peak, `None` if no CPU sample is retained.
    pub cpu: Option<CpuPeak>,
    /// Per-slot GPU peaks ordered by index.
    pub gpus: Vec<GpuPeak>,
}
