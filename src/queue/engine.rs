//! Queue Engine
//!
//! This module defines the contract between the protocol layer and the
//! queue storage behind it ([`QueueEngine`]), plus an in-memory engine
//! ([`QueueCollection`]) that implements it.
//!
//! ## Reliable Reads
//!
//! A transactional remove takes the item off the queue but does not forget
//! it: the item is parked in the queue's open-transaction table under a
//! fresh [`Xid`] until the reader either confirms it (the item is gone for
//! good) or hands it back (the item goes to the head of the queue again).
//! Transactions nobody resolves are requeued by the sweeper once they
//! exceed [`QueueConfig::transaction_timeout`].
//!
//! ```text
//!  add ──> [ items (FIFO) ] ──remove(transactional)──> [ open: xid -> item ]
//!                ▲                                          │        │
//!                │                 unremove / timed out     │        │ confirm_remove
//!                └──────────────────────────────────────────┘        ▼
//!                                                                  gone
//! ```
//!
//! ## Waiting
//!
//! Readers that find a queue empty wait on the queue's `Notify` until an
//! item is added, the queue is closed, or their deadline passes. Taking an
//! item happens synchronously under the queue lock, so dropping a pending
//! `remove` future never loses an item.

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Transaction identifier assigned to an item delivered by a reliable read.
pub type Xid = u64;

/// An item stored in a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// When the item was added
    pub added_at: Instant,
    /// When this item expires (None = never expires)
    pub expires_at: Option<Instant>,
    /// The payload
    pub data: Bytes,
    /// Set when the item was handed out under a reliable read
    pub xid: Option<Xid>,
}

impl QueueItem {
    /// Creates a new item added at `now`.
    pub fn new(data: Bytes, expires_at: Option<Instant>, now: Instant) -> Self {
        Self {
            added_at: now,
            expires_at,
            data,
            xid: None,
        }
    }

    /// Checks if this item has expired.
    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

/// Reasons a queue refuses an item.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue holds `max_items` items already
    #[error("queue '{0}' is full")]
    Full(String),

    /// The queue was deleted or the server is shutting down
    #[error("queue '{0}' is closed")]
    Closed(String),
}

/// The operations the protocol layer needs from queue storage.
///
/// Implementations must be safe to share between all connections.
pub trait QueueEngine: Send + Sync + 'static {
    /// Appends an item to `queue`.
    fn add(&self, queue: &str, data: Bytes, expiry: Option<Instant>) -> Result<(), QueueError>;

    /// Takes (or with `peek`, looks at) the item at the head of `queue`.
    ///
    /// Waits until an item is available or `deadline` passes; resolves to
    /// `None` on timeout. With `deadline = None` it waits for as long as
    /// the queue stays open. With `transactional`, the returned item
    /// carries an `xid` that must later be confirmed or handed back.
    ///
    /// The future resolves exactly once and must be safe to drop before
    /// completion.
    fn remove(
        &self,
        queue: &str,
        deadline: Option<Instant>,
        transactional: bool,
        peek: bool,
    ) -> impl Future<Output = Option<QueueItem>> + Send;

    /// Acknowledges a reliable read; the item is discarded for good.
    fn confirm_remove(&self, queue: &str, xid: Xid);

    /// Hands a reliable read back to the head of the queue.
    ///
    /// Returns `false` if no such open transaction exists.
    fn unremove(&self, queue: &str, xid: Xid) -> bool;

    /// Drops every pending item of `queue`, returning how many were dropped.
    fn flush(&self, queue: &str) -> usize;

    /// Removes `queue` entirely. Returns `false` if it didn't exist.
    fn delete(&self, queue: &str) -> bool;
}

/// Configuration for the in-memory queues.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum pending items per queue (0 = unbounded)
    pub max_items: usize,

    /// Age after which an unresolved transaction is requeued (None = never)
    pub transaction_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_items: 0,
            transaction_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// An item handed out under a reliable read.
#[derive(Debug)]
struct OpenTransaction {
    item: QueueItem,
    opened_at: Instant,
}

/// Counters shared by every queue in a collection.
///
/// Xids are unique across the whole collection, including across a
/// delete and recreate of the same queue name.
#[derive(Debug, Default)]
struct Counters {
    last_xid: AtomicU64,
    added: AtomicU64,
    expired: AtomicU64,
    requeued: AtomicU64,
}

impl Counters {
    fn next_xid(&self) -> Xid {
        self.last_xid.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    open: HashMap<Xid, OpenTransaction>,
}

impl QueueState {
    /// Drops expired items sitting at the head, returning how many.
    fn discard_expired_head(&mut self, now: Instant) -> usize {
        let mut dropped = 0;
        while self.items.front().is_some_and(|item| item.is_expired(now)) {
            self.items.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Moves an open transaction back to the head of the queue.
    fn requeue(&mut self, xid: Xid) -> bool {
        match self.open.remove(&xid) {
            Some(open) => {
                let mut item = open.item;
                item.xid = None;
                self.items.push_front(item);
                true
            }
            None => false,
        }
    }
}

/// A single named FIFO queue.
#[derive(Debug)]
struct Queue {
    state: Mutex<QueueState>,
    /// Woken whenever an item becomes visible or the queue closes
    notify: Notify,
    closed: AtomicBool,
}

impl Queue {
    fn new(closed: bool) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(closed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Takes the head item without waiting.
    fn take(
        &self,
        transactional: bool,
        peek: bool,
        now: Instant,
        counters: &Counters,
    ) -> Option<QueueItem> {
        let mut state = self.lock();
        let dropped = state.discard_expired_head(now);
        if dropped > 0 {
            counters.expired.fetch_add(dropped as u64, Ordering::Relaxed);
        }

        if peek {
            return state.items.front().cloned();
        }

        let mut item = state.items.pop_front()?;
        if transactional {
            let xid = counters.next_xid();
            item.xid = Some(xid);
            state.open.insert(
                xid,
                OpenTransaction {
                    item: item.clone(),
                    opened_at: now,
                },
            );
        }
        Some(item)
    }
}

/// Statistics about the queue collection.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub queues: usize,
    pub items: usize,
    pub open_transactions: usize,
    pub total_added: u64,
    pub total_expired: u64,
    pub total_requeued: u64,
}

/// In-memory implementation of [`QueueEngine`].
///
/// Queues are created on first use. Wrap it in an `Arc` and share it
/// across all connection tasks.
///
/// # Example
///
/// ```
/// use linequeue::queue::{QueueCollection, QueueEngine};
/// use bytes::Bytes;
///
/// let queues = QueueCollection::new();
/// queues.add("jobs", Bytes::from("job-1"), None).unwrap();
/// assert_eq!(queues.len("jobs"), 1);
/// ```
pub struct QueueCollection {
    queues: RwLock<HashMap<String, Arc<Queue>>>,
    config: QueueConfig,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for QueueCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueCollection")
            .field("queues", &self.read_queues().len())
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for QueueCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueCollection {
    /// Creates an empty collection with default settings.
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Creates an empty collection with the given settings.
    pub fn with_config(config: QueueConfig) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            config,
            closed: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
        }
    }

    fn read_queues(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Queue>>> {
        self.queues.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_queues(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Queue>>> {
        self.queues.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up a queue without creating it.
    fn existing(&self, name: &str) -> Option<Arc<Queue>> {
        self.read_queues().get(name).cloned()
    }

    /// Looks up a queue, creating it if needed.
    fn queue(&self, name: &str) -> Arc<Queue> {
        if let Some(queue) = self.existing(name) {
            return queue;
        }

        let mut queues = self.write_queues();
        let queue = queues.entry(name.to_string()).or_insert_with(|| {
            debug!(queue = %name, "Creating queue");
            Arc::new(Queue::new(self.closed.load(Ordering::Acquire)))
        });
        Arc::clone(queue)
    }

    /// Number of pending (not yet delivered) items in `queue`.
    pub fn len(&self, queue: &str) -> usize {
        self.existing(queue).map(|q| q.lock().items.len()).unwrap_or(0)
    }

    /// Returns true if `queue` has no pending items.
    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Number of unresolved reliable reads on `queue`.
    pub fn open_transactions(&self, queue: &str) -> usize {
        self.existing(queue).map(|q| q.lock().open.len()).unwrap_or(0)
    }

    /// Names of all queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_queues().keys().cloned().collect();
        names.sort();
        names
    }

    /// Refuses further adds and wakes every waiting reader.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for queue in self.read_queues().values() {
            queue.close();
        }
        debug!("Queue collection closed");
    }

    /// Removes every expired pending item from every queue.
    ///
    /// Returns the number of items removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let queues: Vec<Arc<Queue>> = self.read_queues().values().cloned().collect();

        let mut removed = 0;
        for queue in queues {
            let mut state = queue.lock();
            let before = state.items.len();
            state.items.retain(|item| !item.is_expired(now));
            removed += before - state.items.len();
        }

        self.counters.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Hands back every open transaction older than the configured
    /// transaction timeout.
    ///
    /// Returns the number of items made visible again.
    pub fn requeue_stale_transactions(&self) -> usize {
        let timeout = match self.config.transaction_timeout {
            Some(timeout) => timeout,
            None => return 0,
        };
        let now = Instant::now();
        let queues: Vec<(String, Arc<Queue>)> = self
            .read_queues()
            .iter()
            .map(|(name, queue)| (name.clone(), Arc::clone(queue)))
            .collect();

        let mut requeued = 0;
        for (name, queue) in queues {
            let count = {
                let mut state = queue.lock();
                let mut stale: Vec<Xid> = state
                    .open
                    .iter()
                    .filter(|(_, open)| now.duration_since(open.opened_at) >= timeout)
                    .map(|(xid, _)| *xid)
                    .collect();
                // Newest first, so the oldest ends up at the head.
                stale.sort_unstable_by(|a, b| b.cmp(a));
                let mut count = 0;
                for xid in stale {
                    if state.requeue(xid) {
                        count += 1;
                    }
                }
                count
            };

            if count > 0 {
                trace!(queue = %name, count = count, "Requeued stale transactions");
                queue.notify.notify_waiters();
                requeued += count;
            }
        }

        self.counters.requeued.fetch_add(requeued as u64, Ordering::Relaxed);
        requeued
    }

    /// Returns a snapshot of the collection's statistics.
    pub fn stats(&self) -> QueueStats {
        let queues = self.read_queues();
        let (items, open_transactions) = queues.values().fold((0, 0), |(items, open), queue| {
            let state = queue.lock();
            (items + state.items.len(), open + state.open.len())
        });

        QueueStats {
            queues: queues.len(),
            items,
            open_transactions,
            total_added: self.counters.added.load(Ordering::Relaxed),
            total_expired: self.counters.expired.load(Ordering::Relaxed),
            total_requeued: self.counters.requeued.load(Ordering::Relaxed),
        }
    }
}

impl QueueEngine for QueueCollection {
    fn add(&self, queue: &str, data: Bytes, expiry: Option<Instant>) -> Result<(), QueueError> {
        let q = self.queue(queue);
        if q.is_closed() {
            return Err(QueueError::Closed(queue.to_string()));
        }

        {
            let mut state = q.lock();
            if self.config.max_items > 0 && state.items.len() >= self.config.max_items {
                return Err(QueueError::Full(queue.to_string()));
            }
            state
                .items
                .push_back(QueueItem::new(data, expiry, Instant::now()));
        }

        self.counters.added.fetch_add(1, Ordering::Relaxed);
        q.notify.notify_waiters();
        Ok(())
    }

    fn remove(
        &self,
        queue: &str,
        deadline: Option<Instant>,
        transactional: bool,
        peek: bool,
    ) -> impl Future<Output = Option<QueueItem>> + Send {
        let q = self.queue(queue);
        let counters = Arc::clone(&self.counters);

        async move {
            loop {
                // Register interest before looking, so an add that lands
                // between the check and the wait still wakes us.
                let notified = q.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(item) = q.take(transactional, peek, Instant::now(), &counters) {
                    return Some(item);
                }
                if q.is_closed() {
                    return None;
                }

                match deadline {
                    None => notified.await,
                    Some(deadline) => {
                        let deadline = tokio::time::Instant::from_std(deadline);
                        if tokio::time::timeout_at(deadline, notified).await.is_err() {
                            return None;
                        }
                    }
                }
            }
        }
    }

    fn confirm_remove(&self, queue: &str, xid: Xid) {
        if let Some(q) = self.existing(queue) {
            if q.lock().open.remove(&xid).is_none() {
                debug!(queue = %queue, xid = xid, "Confirm for unknown transaction");
            }
        }
    }

    fn unremove(&self, queue: &str, xid: Xid) -> bool {
        let q = match self.existing(queue) {
            Some(q) => q,
            None => return false,
        };

        let requeued = q.lock().requeue(xid);
        if requeued {
            q.notify.notify_waiters();
        }
        requeued
    }

    fn flush(&self, queue: &str) -> usize {
        self.existing(queue)
            .map(|q| {
                let mut state = q.lock();
                let count = state.items.len();
                state.items.clear();
                count
            })
            .unwrap_or(0)
    }

    fn delete(&self, queue: &str) -> bool {
        match self.write_queues().remove(queue) {
            Some(q) => {
                q.close();
                debug!(queue = %queue, "Deleted queue");
                true
            }
            None => false,
        }
    }
}
