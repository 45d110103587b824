//! In-memory state for the nodewatch collector.
//!
//! The ingestion path is split in two halves joined by a [`StagingQueue`]:
//! connection handlers push the newest report per node, and a single writer
//! drains it into the [`HistoryStore`]. The store keeps only samples inside
//! its retention window and exposes windowed-max summaries that the
//! [`match_nodes`] query filters against caller thresholds.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use nodewatch_proto::{CpuInfo, Report};
//! use nodewatch_store::{HistoryStore, MatchRequest, match_nodes};
//!
//! let store = HistoryStore::new(Duration::from_secs(10));
//! let report = Report::new("cpu-box", CpuInfo { cpu_percent: 5.0, cpu_count: 8 }, vec![])
//!     .with_observed_ip("10.0.0.9");
//! store.upsert(&report).unwrap();
//!
//! let request = MatchRequest::default().with_gpu_count(0);
//! let matches = match_nodes(&store.list_all().unwrap(), &request);
//! assert_eq!(matches[0].host_name, "cpu-box");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod history;
pub mod liveness;
pub mod matcher;
pub mod queue;
pub mod size;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use history::{HistoryStore, UpsertOutcome};
pub use liveness::{Liveness, LivenessEvent, Transition, is_stale};
pub use matcher::{MatchRequest, NodeMatch, match_nodes};
pub use queue::{DrainOrder, StagingKey, StagingQueue};
pub use size::parse_size;
pub use types::{CpuPeak, CpuSample, GpuPeak, GpuSample, NodeRecord, NodeSummary, StagedReport};
