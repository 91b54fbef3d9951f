//! Test doubles shared by the unit tests.

use crate::commands::Clock;
use crate::queue::{QueueEngine, QueueError, QueueItem, Xid};
use bytes::Bytes;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Instant;

/// A call made against [`MockEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Add {
        queue: String,
        data: Bytes,
        expiry: Option<Instant>,
    },
    Remove {
        queue: String,
        deadline: Option<Instant>,
        transactional: bool,
        peek: bool,
    },
    Confirm {
        queue: String,
        xid: Xid,
    },
    Unremove {
        queue: String,
        xid: Xid,
    },
    Flush {
        queue: String,
    },
    Delete {
        queue: String,
    },
}

/// Queue engine that records every call and replays scripted results.
#[derive(Debug, Default)]
pub struct MockEngine {
    calls: Mutex<Vec<Call>>,
    /// Results for successive `remove` calls; exhausted means empty queue
    removals: Mutex<VecDeque<Option<QueueItem>>>,
    /// Number of adds to accept before rejecting with `Full`
    accept_adds: Mutex<Option<usize>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues up an item for the next `remove`.
    pub fn will_return(&self, data: &'static str, xid: Xid) -> &Self {
        self.removals.lock().unwrap().push_back(Some(QueueItem {
            added_at: Instant::now(),
            expires_at: None,
            data: Bytes::from(data),
            xid: Some(xid),
        }));
        self
    }

    /// Queues up an empty result for the next `remove`.
    pub fn will_return_nothing(&self) -> &Self {
        self.removals.lock().unwrap().push_back(None);
        self
    }

    /// Accepts `n` adds and rejects the rest.
    pub fn accept_only(&self, n: usize) {
        *self.accept_adds.lock().unwrap() = Some(n);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn confirms(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Confirm { .. }))
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl QueueEngine for MockEngine {
    fn add(&self, queue: &str, data: Bytes, expiry: Option<Instant>) -> Result<(), QueueError> {
        let mut accept = self.accept_adds.lock().unwrap();
        if let Some(remaining) = accept.as_mut() {
            if *remaining == 0 {
                return Err(QueueError::Full(queue.to_string()));
            }
            *remaining -= 1;
        }
        self.record(Call::Add {
            queue: queue.to_string(),
            data,
            expiry,
        });
        Ok(())
    }

    fn remove(
        &self,
        queue: &str,
        deadline: Option<Instant>,
        transactional: bool,
        peek: bool,
    ) -> impl Future<Output = Option<QueueItem>> + Send {
        self.record(Call::Remove {
            queue: queue.to_string(),
            deadline,
            transactional,
            peek,
        });
        let result = self.removals.lock().unwrap().pop_front().flatten();
        std::future::ready(result)
    }

    fn confirm_remove(&self, queue: &str, xid: Xid) {
        self.record(Call::Confirm {
            queue: queue.to_string(),
            xid,
        });
    }

    fn unremove(&self, queue: &str, xid: Xid) -> bool {
        self.record(Call::Unremove {
            queue: queue.to_string(),
            xid,
        });
        true
    }

    fn flush(&self, queue: &str) -> usize {
        self.record(Call::Flush {
            queue: queue.to_string(),
        });
        0
    }

    fn delete(&self, queue: &str) -> bool {
        self.record(Call::Delete {
            queue: queue.to_string(),
        });
        false
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FrozenClock(pub Instant);

impl Clock for FrozenClock {
    fn now(&self) -> Instant {
        self.0
    }
}
