//! Key-coalescing staging queue between connection handlers and the writer.
//!
//! Each key holds at most one pending value. Pushing to a key that is already
//! pending replaces the value in place and keeps the key's queue position, so
//! a burst from one node never grows the backlog and only the newest payload
//! reaches the store.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;

use parking_lot::Mutex;

/// Key for a pending report: the observed address plus the claimed host name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagingKey {
    /// Observed transport address.
    pub ip: String,
    /// Host name from the report.
    pub host_name: String,
}

impl StagingKey {
    /// Create a key.
    #[must_use]
    pub fn new(ip: impl Into<String>, host_name: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            host_name: host_name.into(),
        }
    }
}

impl fmt::Display for StagingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.host_name, self.ip)
    }
}

/// Which pending key [`StagingQueue::pop`] hands out first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainOrder {
    /// Oldest pending key first. Every node is persisted within one drain
    /// cycle of the number of pending keys.
    #[default]
    Fifo,
    /// Most recently inserted key first.
    Lifo,
}

#[derive(Debug)]
struct Cells<K, V> {
    values: HashMap<K, V>,
    order: VecDeque<K>,
}

/// Mutex-guarded coalescing queue.
///
/// `push` and `pop` are mutually exclusive. The queue is cheap to share
/// behind an `Arc`.
#[derive(Debug)]
pub struct StagingQueue<K, V> {
    order: DrainOrder,
    cells: Mutex<Cells<K, V>>,
}

impl<K, V> Default for StagingQueue<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> StagingQueue<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty FIFO queue.
    #[must_use]
    pub fn new() -> Self {
        Self::with_order(DrainOrder::Fifo)
    }

    /// Create an empty queue with the given drain order.
    #[must_use]
    pub fn with_order(order: DrainOrder) -> Self {
        Self {
            order,
            cells: Mutex::new(Cells {
                values: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Drain order of this queue.
    #[must_use]
    pub const fn drain_order(&self) -> DrainOrder {
        self.order
    }

    /// Insert or overwrite the cell for `key`.
    ///
    /// Returns `true` when an older pending value was replaced.
    pub fn push(&self, key: K, value: V) -> bool {
        let mut cells = self.cells.lock();
        match cells.values.insert(key.clone(), value) {
            Some(_) => true,
            None => {
                cells.order.push_back(key);
                false
            }
        }
    }

    /// Remove and return one pending cell, or `None` when the queue is empty.
    pub fn pop(&self) -> Option<(K, V)> {
        let mut cells = self.cells.lock();
        let key = match self.order {
            DrainOrder::Fifo => cells.order.pop_front(),
            DrainOrder::Lifo => cells.order.pop_back(),
        }?;
        let value = cells.values.remove(&key)?;
        Some((key, value))
    }

    /// Number of pending keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.lock().values.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
