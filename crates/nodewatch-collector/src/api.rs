//! HTTP query handlers.
//!
//! `GET /` lists every known node with its windowed-max readings and
//! `GET /get_device` runs the resource matcher.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use nodewatch_proto::{GpuSlotId, NodeIdentity};
use nodewatch_store::{CpuPeak, GpuPeak, MatchRequest, NodeMatch, NodeSummary, match_nodes, parse_size};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::error::{CollectorError, CollectorResult};
use crate::state::CollectorState;

/// CPU block of a response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuView {
    /// Peak utilization in percent.
    pub cpu_percent: f64,
    /// Peak logical core count.
    pub cpu_count: u32,
}

impl From<CpuPeak> for CpuView {
    fn from(peak: CpuPeak) -> Self {
        Self {
            cpu_percent: peak.cpu_percent,
            cpu_count: peak.cpu_count,
        }
    }
}

/// GPU block of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuView {
    /// Slot id.
    pub id: GpuSlotId,
    /// Device index.
    pub index: u32,
    /// Peak fan speed.
    pub fan_speed: Option<u32>,
    /// Peak temperature.
    pub temperature: u32,
    /// Peak utilization.
    pub gpu_utilization: u32,
    /// Total memory in bytes.
    pub memory_total: u64,
    /// Peak used memory in bytes.
    pub memory_used: u64,
    /// Peak free memory in bytes.
    pub memory_free: u64,
}

impl From<GpuPeak> for GpuView {
    fn from(peak: GpuPeak) -> Self {
        Self {
            id: peak.slot_id,
            index: peak.index,
            fan_speed: peak.fan_speed,
            temperature: peak.temperature,
            gpu_utilization: peak.gpu_utilization,
            memory_total: peak.memory_total,
            memory_used: peak.memory_used,
            memory_free: peak.memory_free,
        }
    }
}

/// One entry of the full node listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    /// Host name.
    pub host_name: String,
    /// Observed address.
    pub ip: String,
    /// Node identity.
    pub uid: NodeIdentity,
    /// Current liveness.
    pub is_online: bool,
    /// Last update as unix seconds.
    pub last_update: i64,
    /// CPU peak, `null` when no sample is retained.
    pub cpu: Option<CpuView>,
    /// GPU peaks by index.
    pub gpus: Vec<GpuView>,
}

impl From<NodeSummary> for NodeView {
    fn from(summary: NodeSummary) -> Self {
        let record = summary.record;
        Self {
            is_online: record.is_online(),
            host_name: record.host_name,
            ip: record.ip,
            uid: record.identity,
            last_update: record.last_update.timestamp(),
            cpu: summary.cpu.map(CpuView::from),
            gpus: summary.gpus.into_iter().map(GpuView::from).collect(),
        }
    }
}

/// One entry of a device query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceView {
    /// Host name.
    pub host_name: String,
    /// Observed address.
    pub ip: String,
    /// CPU peak.
    pub cpu_info: CpuView,
    /// Selected GPUs, lowest index first.
    pub gpus_info: Vec<GpuView>,
}

impl From<NodeMatch> for DeviceView {
    fn from(m: NodeMatch) -> Self {
        Self {
            host_name: m.host_name,
            ip: m.ip,
            cpu_info: m.cpu.into(),
            gpus_info: m.gpus.into_iter().map(GpuView::from).collect(),
        }
    }
}

/// Query parameters for `GET /get_device`. Memory fields accept size strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceQuery {
    /// Minimum core count.
    pub cpu_count: u32,
    /// Maximum CPU utilization.
    pub max_cpu_percent: f64,
    /// GPUs required per node.
    pub sum_gpu_count: usize,
    /// Minimum total memory per GPU, e.g. `16GB`.
    pub gpu_memory_total: String,
    /// Minimum free memory per GPU, e.g. `8GB`.
    pub gpu_memory_free: String,
    /// Maximum utilization per GPU.
    pub max_gpu_utilization: f64,
    /// Return only the first match. Accepts `true`/`false`, `1`/`0`,
    /// `yes`/`no` and `on`/`off`.
    #[serde(deserialize_with = "flag")]
    pub only_one: bool,
}

impl Default for DeviceQuery {
    fn default() -> Self {
        Self {
            cpu_count: 4,
            max_cpu_percent: 50.0,
            sum_gpu_count: 2,
            gpu_memory_total: "16GB".to_string(),
            gpu_memory_free: "8GB".to_string(),
            max_gpu_utilization: 20.0,
            only_one: true,
        }
    }
}

impl DeviceQuery {
    /// Normalize into a matcher request.
    ///
    /// # Errors
    ///
    /// Returns an error if a memory size cannot be parsed or a percent bound
    /// is not a number.
    pub fn to_request(&self) -> CollectorResult<MatchRequest> {
        for (name, value) in [
            ("max_cpu_percent", self.max_cpu_percent),
            ("max_gpu_utilization", self.max_gpu_utilization),
        ] {
            if !value.is_finite() {
                return Err(CollectorError::InvalidRequest(format!(
                    "{name} must be a finite number"
                )));
            }
        }
        Ok(MatchRequest::default()
            .with_min_cpu_count(self.cpu_count)
            .with_max_cpu_percent(self.max_cpu_percent)
            .with_gpu_count(self.sum_gpu_count)
            .with_gpu_memory(
                parse_size(&self.gpu_memory_total)?,
                parse_size(&self.gpu_memory_free)?,
            )
            .with_max_gpu_utilization(self.max_gpu_utilization)
            .with_only_one(self.only_one))
    }
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected a boolean, got {other:?}"
        ))),
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status message.
    pub status: String,
    /// Known nodes.
    pub nodes: usize,
    /// Nodes currently online.
    pub online: usize,
    /// Reports waiting for the writer.
    pub pending: usize,
    /// Collector uptime in seconds.
    pub uptime_secs: u64,
}

/// Handle GET / - list all nodes.
pub async fn list_nodes(
    State(state): State<Arc<CollectorState>>,
) -> CollectorResult<Json<Vec<NodeView>>> {
    let nodes = state.store().list_all()?;
    Ok(Json(nodes.into_iter().map(NodeView::from).collect()))
}

/// Handle GET /get_device - find nodes with enough idle resources.
pub async fn get_device(
    State(state): State<Arc<CollectorState>>,
    query: Result<Query<DeviceQuery>, QueryRejection>,
) -> CollectorResult<Json<Vec<DeviceView>>> {
    let Query(query) = query.map_err(|e| CollectorError::InvalidRequest(e.body_text()))?;
    let request = query.to_request()?;
    let nodes = state.store().list_all()?;
    let matches = match_nodes(&nodes, &request);
    debug!(candidates = nodes.len(), matched = matches.len(), "device query");
    Ok(Json(matches.into_iter().map(DeviceView::from).collect()))
}

/// Handle GET /health.
pub async fn health_check(
    State(state): State<Arc<CollectorState>>,
) -> CollectorResult<Json<HealthResponse>> {
    let (nodes, online) = state.store().counts()?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        nodes,
        online,
        pending: state.queue().len(),
        uptime_secs: state.uptime_secs(),
    }))
}
