//! Link state types.

use std::sync::atomic::{AtomicU32, Ordering};

/// State of the collector link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No open connection.
    Disconnected,
    /// A dial is in flight.
    Connecting,
    /// Connected and streaming.
    Connected,
    /// The last dial was refused for a bad key.
    Rejected,
}

/// Atomic wrapper for link state.
#[derive(Debug)]
pub struct AtomicLinkState(AtomicU32);

impl AtomicLinkState {
    /// Create a new atomic state.
    #[must_use]
    pub const fn new(state: LinkState) -> Self {
        Self(AtomicU32::new(state as u32))
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> LinkState {
        match self.0.load(Ordering::SeqCst) {
            0 => LinkState::Disconnected,
            1 => LinkState::Connecting,
            2 => LinkState::Connected,
            _ => LinkState::Rejected,
        }
    }

    /// Store a new state.
    pub fn store(&self, state: LinkState) {
        self.0.store(state as u32, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_link_state() {
        let state = AtomicLinkState::new(LinkState::Disconnected);
        assert_eq!(state.load(), LinkState::Disconnected);

        for next in [
            LinkState::Connecting,
            LinkState::Connected,
            LinkState::Rejected,
            LinkState::Disconnected,
        ] {
            state.store(next);
            assert_eq!(state.load(), next);
        }
    }
}
