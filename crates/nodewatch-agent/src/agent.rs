//! Agent runner.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::config::AgentConfig;
use crate::error::AgentResult;
use crate::gpu::{GpuDetector, NoGpu, NvidiaDetector};
use crate::link::{LinkConfig, LinkManager, send_loop, supervise_receive};
use crate::sampler::{Sampler, SystemSampler};

/// Streams reports from a [`Sampler`] to the collector.
#[derive(Debug)]
pub struct Agent<S> {
    manager: Arc<LinkManager>,
    sampler: Arc<Mutex<S>>,
}

impl Agent<SystemSampler> {
    /// Build an agent sampling this machine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(config: &AgentConfig) -> AgentResult<Self> {
        config.validate()?;
        let gpus: Box<dyn GpuDetector> = if config.gpus {
            Box::new(NvidiaDetector::new())
        } else {
            Box::new(NoGpu)
        };
        let sampler = match &config.host_name {
            Some(name) => SystemSampler::with_host_name(name.clone(), gpus),
            None => SystemSampler::new(gpus),
        };
        Ok(Self::new(config.endpoint()?, config.link, sampler))
    }
}

impl<S: Sampler> Agent<S> {
    /// Create an agent sending `sampler`'s reports to `url`.
    #[must_use]
    pub fn new(url: Url, link: LinkConfig, sampler: S) -> Self {
        Self {
            manager: Arc::new(LinkManager::new(url, link)),
            sampler: Arc::new(Mutex::new(sampler)),
        }
    }

    /// The shared link.
    #[must_use]
    pub const fn link(&self) -> &Arc<LinkManager> {
        &self.manager
    }

    /// Run the send and receive tasks until `cancel` fires, then close the
    /// link.
    pub async fn run(self, cancel: CancellationToken) {
        info!("agent started");
        let sender = tokio::spawn(send_loop(
            Arc::clone(&self.manager),
            Arc::clone(&self.sampler),
            cancel.clone(),
        ));

        supervise_receive(Arc::clone(&self.manager), cancel.clone()).await;

        if let Err(e) = sender.await {
            warn!(error = %e, "send task failed");
        }
        self.manager.close().await;
        info!("agent stopped");
    }
}
