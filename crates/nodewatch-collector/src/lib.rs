//! # nodewatch-collector
//!
//! Central collector for nodewatch agents.
//!
//! ## Architecture
//!
//! ```text
//!  agents ──ws──▶ /ws handler ──push──▶ StagingQueue ──pop──▶ IngestWriter
//!                     │                                          │
//!                     │ disconnect                               ▼ upsert
//!                     └────────── close_transport ────────▶ HistoryStore
//!                                                             ▲      ▲
//!                                      LivenessMonitor ─sweep─┘      │ read
//!                                                                    │
//!  operators ──http──▶ GET /  and  GET /get_device ──────────────────┘
//! ```
//!
//! One handler task runs per agent connection. The writer and the liveness
//! monitor are single background tasks stopped through a shared
//! [`tokio_util::sync::CancellationToken`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod monitor;
pub mod routes;
pub mod server;
pub mod session;
pub mod state;

pub use config::CollectorConfig;
pub use error::{CollectorError, CollectorResult};
pub use ingest::IngestWriter;
pub use monitor::LivenessMonitor;
pub use routes::create_router;
pub use server::CollectorServer;
pub use state::CollectorState;
