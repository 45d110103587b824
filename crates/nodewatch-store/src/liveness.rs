//! Per-node liveness state machine.
//!
//! There is one place that decides what a node's liveness becomes:
//! [`Liveness::next`]. The store feeds it three external events: a fresh
//! sample was ingested, the node's connection closed, or the sweep found the
//! node stale. Only ingestion brings a node back online.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use nodewatch_proto::NodeIdentity;

/// Liveness of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Liveness {
    /// The node has reported recently and its connection is open.
    Online,
    /// The node disconnected or went quiet.
    Offline,
}

/// Events that drive [`Liveness`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LivenessEvent {
    /// A report from the node was written to the store.
    SampleIngested,
    /// The collector observed the node's connection close.
    TransportClosed,
    /// The sweep found no update within the staleness timeout.
    StalenessExpired,
}

impl Liveness {
    /// State after `event`.
    #[must_use]
    pub const fn next(self, event: LivenessEvent) -> Self {
        match event {
            LivenessEvent::SampleIngested => Self::Online,
            LivenessEvent::TransportClosed | LivenessEvent::StalenessExpired => Self::Offline,
        }
    }

    /// Whether this is [`Liveness::Online`].
    #[must_use]
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

impl fmt::Display for LivenessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SampleIngested => write!(f, "sample_ingested"),
            Self::TransportClosed => write!(f, "transport_closed"),
            Self::StalenessExpired => write!(f, "staleness_expired"),
        }
    }
}

/// A state change applied to one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// The node that changed.
    pub identity: NodeIdentity,
    /// State before the event.
    pub from: Liveness,
    /// State after the event.
    pub to: Liveness,
    /// What caused it.
    pub event: LivenessEvent,
}

impl Transition {
    /// Apply `event` to a node in state `from`, returning the transition only
    /// when the state actually changes.
    #[must_use]
    pub fn apply(identity: NodeIdentity, from: Liveness, event: LivenessEvent) -> Option<Self> {
        let to = from.next(event);
        (to != from).then_some(Self {
            identity,
            from,
            to,
            event,
        })
    }
}

/// Whether a node last updated at `last_update` is stale at `now`.
///
/// Strictly greater: a node exactly `timeout` old is still fresh.
#[must_use]
pub fn is_stale(last_update: DateTime<Utc>, now: DateTime<Utc>, timeout: TimeDelta) -> bool {
    now.signed_duration_since(last_update) > timeout
}
