//! # nodewatch-agent
//!
//! Runs on every monitored machine and streams CPU/GPU telemetry to a
//! nodewatch collector.
//!
//! ```text
//!   Sampler ──► send loop ────┐
//!                             ├──► LinkManager ◄──► collector /ws
//!              receive loop ◄─┘    (one link)
//! ```
//!
//! Both loops share one connection through [`link::LinkManager`]. Whichever
//! loop notices the link is broken invalidates it; the next caller of
//! [`link::LinkManager::acquire`] redials while the other waits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod config;
pub mod error;
pub mod gpu;
pub mod link;
pub mod sampler;

pub use agent::Agent;
pub use config::AgentConfig;
pub use error::{AgentError, AgentResult, LinkError, LinkResult};
pub use gpu::{GpuDetector, NoGpu, NvidiaDetector};
pub use sampler::{Sampler, SystemSampler};

/// Take one sample of this machine, as it would be sent.
///
/// # Errors
///
/// Returns an error if sampling fails.
pub async fn sample_once<S: Sampler>(sampler: S) -> AgentResult<nodewatch_proto::Report> {
    let sampler = std::sync::Arc::new(parking_lot::Mutex::new(sampler));
    link::sample_report(&sampler).await
}
