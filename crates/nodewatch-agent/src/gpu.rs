//! GPU metrics collection.
//!
//! NVIDIA GPUs are read through `nvidia-smi`. Hosts without the tool report
//! no GPUs instead of failing.

use std::io::ErrorKind;
use std::process::Command;

use nodewatch_proto::GpuInfo;
use tracing::debug;

use crate::error::{AgentError, AgentResult};

const MIB: u64 = 1024 * 1024;

/// Fields requested from `nvidia-smi`, in column order.
pub const NVIDIA_QUERY_FIELDS: &str =
    "index,fan.speed,temperature.gpu,utilization.gpu,memory.total,memory.used,memory.free";

const NOT_AVAILABLE: &str = "[N/A]";

/// Source of per-GPU readings.
pub trait GpuDetector: Send + Sync {
    /// Read every GPU on the host.
    ///
    /// # Errors
    ///
    /// Returns an error if the readings cannot be taken or parsed.
    fn collect(&self) -> AgentResult<Vec<GpuInfo>>;
}

/// Reports no GPUs. Used for CPU-only hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGpu;

impl GpuDetector for NoGpu {
    fn collect(&self) -> AgentResult<Vec<GpuInfo>> {
        Ok(Vec::new())
    }
}

/// NVIDIA GPU detector using nvidia-smi.
#[derive(Debug, Default)]
pub struct NvidiaDetector {
    /// Custom nvidia-smi path (for non-standard installs).
    nvidia_smi_path: Option<String>,
}

impl NvidiaDetector {
    /// Create a detector using `nvidia-smi` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detector with a custom nvidia-smi path.
    #[must_use]
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            nvidia_smi_path: Some(path.into()),
        }
    }

    fn nvidia_smi_path(&self) -> &str {
        self.nvidia_smi_path.as_deref().unwrap_or("nvidia-smi")
    }
}

impl GpuDetector for NvidiaDetector {
    fn collect(&self) -> AgentResult<Vec<GpuInfo>> {
        let output = match Command::new(self.nvidia_smi_path())
            .arg(format!("--query-gpu={NVIDIA_QUERY_FIELDS}"))
            .arg("--format=csv,noheader,nounits")
            .output()
        {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = self.nvidia_smi_path(), "nvidia-smi not found, reporting no GPUs");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::Sampling(format!(
                "nvidia-smi exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_nvidia_csv(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `nvidia-smi --format=csv,noheader,nounits` output for
/// [`NVIDIA_QUERY_FIELDS`].
///
/// Memory columns are MiB and are converted to bytes. A fan reading of
/// `[N/A]` (passively cooled boards) becomes `None`. Lines with too few
/// columns, or with `[N/A]` in any other column, are skipped.
///
/// # Errors
///
/// Returns [`AgentError::Sampling`] when a column holds a non-numeric value.
pub fn parse_nvidia_csv(output: &str) -> AgentResult<Vec<GpuInfo>> {
    let mut gpus = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 7 {
            continue;
        }
        if parts
            .iter()
            .enumerate()
            .any(|(i, p)| i != 1 && *p == NOT_AVAILABLE)
        {
            debug!(line, "skipping GPU with unavailable readings");
            continue;
        }

        let fan_speed = if parts[1] == NOT_AVAILABLE {
            None
        } else {
            Some(parse_field::<u32>(parts[1], "fan speed")?)
        };

        gpus.push(GpuInfo {
            index: parse_field(parts[0], "GPU index")?,
            fan_speed,
            temperature: parse_field(parts[2], "temperature")?,
            gpu_utilization: parse_field(parts[3], "utilization")?,
            memory_total: mib_to_bytes(parse_field(parts[4], "memory total")?),
            memory_used: mib_to_bytes(parse_field(parts[5], "memory used")?),
            memory_free: mib_to_bytes(parse_field(parts[6], "memory free")?),
        });
    }

    Ok(gpus)
}

fn parse_field<T>(value: &str, what: &str) -> AgentResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| AgentError::Sampling(format!("invalid {what} {value:?}: {e}")))
}

const fn mib_to_bytes(mib: u64) -> u64 {
    mib.saturating_mul(MIB)
}
