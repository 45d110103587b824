//! Collector link.
//!
//! A single WebSocket connection shared by two tasks: one sends a report
//! every tick, the other watches for acknowledgements and tears the
//! connection down when the collector goes quiet. Either task may find the
//! link broken; [`LinkManager`] makes sure only one of them redials.

mod config;
mod manager;
mod state;
mod tasks;

pub use config::{LinkConfig, endpoint_url};
pub use manager::{Link, LinkManager};
pub use state::{AtomicLinkState, LinkState};
pub use tasks::{receive_loop, send_loop, send_once, supervise_receive};

pub(crate) use tasks::sample_report;
