//! Host sampling.

use nodewatch_proto::{CpuInfo, Report};
use sysinfo::System;

use crate::error::{AgentError, AgentResult};
use crate::gpu::GpuDetector;

/// Produces one [`Report`] per call.
///
/// Sampling may block (GPU tools are external processes), so the link tasks
/// run it on the blocking pool.
pub trait Sampler: Send + 'static {
    /// Take one sample of the host.
    ///
    /// # Errors
    ///
    /// Returns an error if a reading cannot be taken.
    fn sample(&mut self) -> AgentResult<Report>;
}

/// Samples the local machine.
pub struct SystemSampler {
    system: System,
    host_name: String,
    gpus: Box<dyn GpuDetector>,
}

impl std::fmt::Debug for SystemSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSampler")
            .field("host_name", &self.host_name)
            .finish_non_exhaustive()
    }
}

impl SystemSampler {
    /// Create a sampler reporting under the machine's host name.
    #[must_use]
    pub fn new(gpus: Box<dyn GpuDetector>) -> Self {
        Self::with_host_name(local_host_name(), gpus)
    }

    /// Create a sampler reporting under `host_name`.
    #[must_use]
    pub fn with_host_name(host_name: impl Into<String>, gpus: Box<dyn GpuDetector>) -> Self {
        let mut system = System::new();
        // CPU usage is a delta between refreshes; prime the first one.
        system.refresh_cpu_all();
        Self {
            system,
            host_name: host_name.into(),
            gpus,
        }
    }

    /// The host name sent in reports.
    #[must_use]
    pub fn host_name(&self) -> &str {
        &self.host_name
    }
}

impl Sampler for SystemSampler {
    fn sample(&mut self) -> AgentResult<Report> {
        self.system.refresh_cpu_usage();

        let cpu_count = u32::try_from(self.system.cpus().len())
            .map_err(|_| AgentError::Sampling("cpu count out of range".to_string()))?;
        let cpu_info = CpuInfo {
            cpu_percent: f64::from(self.system.global_cpu_usage()),
            cpu_count,
        };

        Ok(Report::new(self.host_name.clone(), cpu_info, self.gpus.collect()?))
    }
}

/// The machine's host name, or `"unknown"` if it cannot be read.
#[must_use]
pub fn local_host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::NoGpu;
    use nodewatch_proto::GpuInfo;

    struct OneGpu;

    impl GpuDetector for OneGpu {
        fn collect(&self) -> AgentResult<Vec<GpuInfo>> {
            Ok(vec![GpuInfo {
                index: 0,
                fan_speed: None,
                temperature: 40,
                gpu_utilization: 5,
                memory_total: 16 << 30,
                memory_used: 1 << 30,
                memory_free: 15 << 30,
            }])
        }
    }

    struct BrokenGpu;

    impl GpuDetector for BrokenGpu {
        fn collect(&self) -> AgentResult<Vec<GpuInfo>> {
            Err(AgentError::Sampling("driver mismatch".to_string()))
        }
    }

    #[test]
    fn test_sample_reports_host_and_cpu() {
        let mut sampler = SystemSampler::with_host_name("node-a", Box::new(NoGpu));
        let report = sampler.sample().unwrap();

        assert_eq!(report.host_name(), "node-a");
        assert!(report.ip().is_none());
        assert!(report.cpu_info.cpu_count >= 1);
        assert!(report.cpu_info.cpu_percent >= 0.0);
        assert!(report.gpu_info.is_empty());
        report.validate().unwrap();
    }

    #[test]
    fn test_sample_includes_gpus() {
        let mut sampler = SystemSampler::with_host_name("node-a", Box::new(OneGpu));
        let report = sampler.sample().unwrap();
        assert_eq!(report.gpu_info.len(), 1);
        assert_eq!(report.gpu_info[0].memory_free, 15 << 30);
    }

    #[test]
    fn test_gpu_failure_fails_sample() {
        let mut sampler = SystemSampler::with_host_name("node-a", Box::new(BrokenGpu));
        assert!(matches!(sampler.sample(), Err(AgentError::Sampling(_))));
    }

    #[test]
    fn test_local_host_name_not_empty() {
        assert!(!local_host_name().is_empty());
    }
}
