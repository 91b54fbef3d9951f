//! Per-connection record of unconfirmed reliable reads.
//!
//! Each connection owns exactly one tracker and only touches it from its
//! own task, so it needs no locking.

use crate::queue::Xid;
use std::collections::HashMap;

/// Maps a queue name to the single outstanding transaction on that queue.
#[derive(Debug, Default)]
pub struct TransactionTracker {
    open: HashMap<String, Xid>,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `xid` as the outstanding read on `queue`.
    ///
    /// Replaces any earlier entry; callers confirm or abort it first.
    pub fn add(&mut self, queue: &str, xid: Xid) {
        self.open.insert(queue.to_string(), xid);
    }

    /// Number of outstanding reads on `queue` (0 or 1).
    pub fn size(&self, queue: &str) -> usize {
        usize::from(self.open.contains_key(queue))
    }

    /// Clears and returns the outstanding read on `queue`.
    pub fn remove(&mut self, queue: &str) -> Option<Xid> {
        self.open.remove(queue)
    }

    /// Total outstanding reads across all queues.
    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Forgets every outstanding read, returning them.
    pub fn drain(&mut self) -> Vec<(String, Xid)> {
        self.open.drain().collect()
    }
}
