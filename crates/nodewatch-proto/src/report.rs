//! Telemetry report sent from agent to collector.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{ProtoError, ProtoResult};
use crate::identity::NodeIdentity;

/// Literal text frame the collector sends back for every accepted report.
pub const ACK: &str = "OK";

/// Longest host name accepted in a report.
pub const MAX_HOST_NAME_LEN: usize = 253;

/// One telemetry sample from a node: host, CPU and every visible GPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Host identification.
    pub host_info: HostInfo,
    /// CPU reading.
    pub cpu_info: CpuInfo,
    /// GPU readings, one per device.
    #[serde(default)]
    pub gpu_info: Vec<GpuInfo>,
}

/// Host identification block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Host name as reported by the node.
    pub host_name: String,
    /// Source address. Always overwritten by the collector with the observed
    /// transport address; agents normally leave it unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// CPU reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuInfo {
    /// System-wide utilization in percent.
    pub cpu_percent: f64,
    /// Logical core count.
    pub cpu_count: u32,
}

/// Reading for a single GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    /// Device index on the node.
    pub index: u32,
    /// Fan speed in percent; `None` for passively cooled boards.
    #[serde(default)]
    pub fan_speed: Option<u32>,
    /// Core temperature in degrees Celsius.
    pub temperature: u32,
    /// Compute utilization in percent.
    pub gpu_utilization: u32,
    /// Total memory in bytes.
    pub memory_total: u64,
    /// Used memory in bytes.
    pub memory_used: u64,
    /// Free memory in bytes.
    pub memory_free: u64,
}

impl Report {
    /// Create a report without an address.
    #[must_use]
    pub fn new(host_name: impl Into<String>, cpu_info: CpuInfo, gpu_info: Vec<GpuInfo>) -> Self {
        Self {
            host_info: HostInfo {
                host_name: host_name.into(),
                ip: None,
            },
            cpu_info,
            gpu_info,
        }
    }

    /// Replace whatever address the client claimed with the observed one.
    #[must_use]
    pub fn with_observed_ip(mut self, ip: impl Into<String>) -> Self {
        self.host_info.ip = Some(ip.into());
        self
    }

    /// Host name of the reporting node.
    #[must_use]
    pub fn host_name(&self) -> &str {
        &self.host_info.host_name
    }

    /// Address of the reporting node, if one has been attached.
    #[must_use]
    pub fn ip(&self) -> Option<&str> {
        self.host_info.ip.as_deref()
    }

    /// Identity of the reporting node.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Validation`] if no address has been attached yet.
    pub fn identity(&self) -> ProtoResult<NodeIdentity> {
        let ip = self
            .ip()
            .ok_or_else(|| ProtoError::Validation("report has no ip".to_string()))?;
        Ok(NodeIdentity::derive(self.host_name(), ip))
    }

    /// Check the report against the protocol rules.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Validation`] describing the first violated rule.
    pub fn validate(&self) -> ProtoResult<()> {
        let host = self.host_name();
        if host.trim().is_empty() {
            return Err(ProtoError::Validation("host_name is empty".to_string()));
        }
        if host.len() > MAX_HOST_NAME_LEN {
            return Err(ProtoError::Validation(format!(
                "host_name longer than {MAX_HOST_NAME_LEN} bytes"
            )));
        }
        if host.chars().any(char::is_control) {
            return Err(ProtoError::Validation(
                "host_name contains control characters".to_string(),
            ));
        }

        let cpu = self.cpu_info.cpu_percent;
        if !cpu.is_finite() || cpu < 0.0 {
            return Err(ProtoError::Validation(format!("cpu_percent out of range: {cpu}")));
        }

        let mut seen = HashSet::with_capacity(self.gpu_info.len());
        for gpu in &self.gpu_info {
            if !seen.insert(gpu.index) {
                return Err(ProtoError::Validation(format!(
                    "duplicate gpu index {}",
                    gpu.index
                )));
            }
        }

        Ok(())
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> ProtoResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a well-formed report.
    pub fn from_json(json: &str) -> ProtoResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
