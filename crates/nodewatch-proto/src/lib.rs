//! # nodewatch-proto
//!
//! Wire protocol shared by the nodewatch agent and collector.
//!
//! An agent streams one [`Report`] per tick over a WebSocket; the collector
//! answers every accepted report with the literal [`ACK`]. Nodes are keyed by
//! a [`NodeIdentity`] derived from their host name and observed address, and
//! every GPU on a node by a [`GpuSlotId`] derived from that identity.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod identity;
pub mod report;

pub use error::{ProtoError, ProtoResult};
pub use identity::{GpuSlotId, NodeIdentity};
pub use report::{ACK, CpuInfo, GpuInfo, HostInfo, Report};
