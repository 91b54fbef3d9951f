//! Connection Registry
//!
//! Process-wide list of open connections. Every connection registers once
//! when it opens and is removed again when its [`RegisteredConnection`]
//! guard is dropped. The registry can enumerate the live connections and
//! broadcast a shutdown request to all of them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info};

/// Identifier assigned to each registered connection.
pub type ConnectionId = u64;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Registry of all live connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, SocketAddr>>,
    next_id: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    stats: ConnectionStats,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown_tx,
            stats: ConnectionStats::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, SocketAddr>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a newly opened connection.
    ///
    /// The connection stays registered until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, addr: SocketAddr) -> RegisteredConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, addr);
        self.stats.connection_opened();
        debug!(client = %addr, id = id, "Registered connection");

        RegisteredConnection {
            id,
            addr,
            shutdown_rx: self.shutdown_tx.subscribe(),
            registry: Arc::clone(self),
        }
    }

    fn deregister(&self, id: ConnectionId) {
        if self.lock().remove(&id).is_some() {
            self.stats.connection_closed();
        }
    }

    /// Snapshot of the live connections, ordered by id.
    pub fn connections(&self) -> Vec<(ConnectionId, SocketAddr)> {
        let mut connections: Vec<_> = self.lock().iter().map(|(id, addr)| (*id, *addr)).collect();
        connections.sort_unstable_by_key(|(id, _)| *id);
        connections
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Asks every connection, current and future, to close.
    pub fn shutdown_all(&self) {
        info!(connections = self.len(), "Closing all connections");
        self.shutdown_tx.send_replace(true);
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }
}

/// Membership of one connection in the registry.
#[derive(Debug)]
pub struct RegisteredConnection {
    id: ConnectionId,
    addr: SocketAddr,
    shutdown_rx: watch::Receiver<bool>,
    registry: Arc<ConnectionRegistry>,
}

impl RegisteredConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stats(&self) -> &ConnectionStats {
        self.registry.stats()
    }

    /// Completes once the registry asks connections to close.
    ///
    /// Cancel-safe.
    pub async fn shutdown_requested(&mut self) {
        // The sender lives in the registry we hold an Arc to, so this only
        // returns once the flag is set.
        let _ = self.shutdown_rx.wait_for(|stop| *stop).await;
    }
}

impl Drop for RegisteredConnection {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
