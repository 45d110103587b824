//! Resource matching over windowed-max node summaries.
//!
//! [`match_nodes`] is a pure function: the same summaries and request always
//! produce the same answer. Nodes are returned in the order the store first
//! saw them; there is no ranking beyond the filters.

use nodewatch_proto::NodeIdentity;

use crate::types::{CpuPeak, GpuPeak, NodeSummary};

/// Thresholds for a resource query. Memory is in bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchRequest {
    /// Minimum logical core count.
    pub min_cpu_count: u32,
    /// Maximum CPU utilization in percent.
    pub max_cpu_percent: f64,
    /// Number of qualifying GPUs required, and returned, per node.
    pub gpu_count: usize,
    /// Minimum total memory of a qualifying GPU.
    pub min_gpu_memory_total: u64,
    /// Minimum free memory of a qualifying GPU.
    pub min_gpu_memory_free: u64,
    /// Maximum utilization of a qualifying GPU in percent.
    pub max_gpu_utilization: f64,
    /// Return only the first matching node.
    pub only_one: bool,
}

impl Default for MatchRequest {
    fn default() -> Self {
        Self {
            min_cpu_count: 4,
            max_cpu_percent: 50.0,
            gpu_count: 2,
            min_gpu_memory_total: 16_000_000_000,
            min_gpu_memory_free: 8_000_000_000,
            max_gpu_utilization: 20.0,
            only_one: true,
        }
    }
}

impl MatchRequest {
    /// Set the minimum core count.
    #[must_use]
    pub const fn with_min_cpu_count(mut self, count: u32) -> Self {
        self.min_cpu_count = count;
        self
    }

    /// Set the CPU utilization ceiling.
    #[must_use]
    pub const fn with_max_cpu_percent(mut self, percent: f64) -> Self {
        self.max_cpu_percent = percent;
        self
    }

    /// Set the number of GPUs required per node.
    #[must_use]
    pub const fn with_gpu_count(mut self, count: usize) -> Self {
        self.gpu_count = count;
        self
    }

    /// Set the per-GPU memory floors.
    #[must_use]
    pub const fn with_gpu_memory(mut self, total: u64, free: u64) -> Self {
        self.min_gpu_memory_total = total;
        self.min_gpu_memory_free = free;
        self
    }

    /// Set the per-GPU utilization ceiling.
    #[must_use]
    pub const fn with_max_gpu_utilization(mut self, percent: f64) -> Self {
        self.max_gpu_utilization = percent;
        self
    }

    /// Choose between the first match and all matches.
    #[must_use]
    pub const fn with_only_one(mut self, only_one: bool) -> Self {
        self.only_one = only_one;
        self
    }

    fn cpu_fits(&self, cpu: &CpuPeak) -> bool {
        cpu.cpu_count >= self.min_cpu_count && cpu.cpu_percent <= self.max_cpu_percent
    }

    fn gpu_fits(&self, gpu: &GpuPeak) -> bool {
        gpu.memory_total >= self.min_gpu_memory_total
            && gpu.memory_free >= self.min_gpu_memory_free
            && f64::from(gpu.gpu_utilization) <= self.max_gpu_utilization
    }
}

/// A node that satisfied a [`MatchRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMatch {
    /// Node identity.
    pub identity: NodeIdentity,
    /// Host name.
    pub host_name: String,
    /// Observed address.
    pub ip: String,
    /// CPU peak that passed the filter.
    pub cpu: CpuPeak,
    /// Exactly `gpu_count` qualifying GPUs, lowest index first.
    pub gpus: Vec<GpuPeak>,
}

/// Filter and trim `nodes` against `request`.
///
/// 1. Keep online nodes whose CPU peak has enough cores and low enough load.
/// 2. Keep each node's GPUs that meet the memory and utilization bounds.
/// 3. Drop nodes with fewer qualifying GPUs than requested.
/// 4. Sort the qualifying GPUs by index and keep the first `gpu_count`.
/// 5. Return the first node or all of them, per `only_one`.
#[must_use]
pub fn match_nodes(nodes: &[NodeSummary], request: &MatchRequest) -> Vec<NodeMatch> {
    let matches = nodes.iter().filter_map(|node| match_one(node, request));
    if request.only_one {
        matches.take(1).collect()
    } else {
        matches.collect()
    }
}

fn match_one(node: &NodeSummary, request: &MatchRequest) -> Option<NodeMatch> {
    if !node.record.is_online() {
        return None;
    }
    let cpu = node.cpu.filter(|cpu| request.cpu_fits(cpu))?;

    let mut gpus: Vec<GpuPeak> = node
        .gpus
        .iter()
        .filter(|gpu| request.gpu_fits(gpu))
        .copied()
        .collect();
    if gpus.len() < request.gpu_count {
        return None;
    }
    gpus.sort_by_key(|gpu| gpu.index);
    gpus.truncate(request.gpu_count);

    Some(NodeMatch {
        identity: node.record.identity,
        host_name: node.record.host_name.clone(),
        ip: node.record.ip.clone(),
        cpu,
        gpus,
    })
}
