//! Background Queue Sweeper
//!
//! Expired items are dropped lazily when they reach the head of a queue,
//! but an item buried behind others would otherwise sit in memory until
//! every item ahead of it is read. Likewise, a reliable read whose client
//! vanished leaves its item parked in the open-transaction table.
//!
//! The sweeper runs as a Tokio task and on every tick:
//! 1. Removes expired items from all queues
//! 2. Requeues open transactions older than the transaction timeout
//!
//! ## Adaptive Frequency
//!
//! If a sweep finds work, the sweeper runs more often. If it finds none,
//! it backs off to save CPU.

use crate::queue::QueueCollection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Configuration for the queue sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Base interval between sweeps (default: 100ms)
    pub base_interval: Duration,

    /// Minimum interval between sweeps (default: 10ms)
    pub min_interval: Duration,

    /// Maximum interval between sweeps (default: 1s)
    pub max_interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
        }
    }
}

/// A handle to the running sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct QueueSweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl QueueSweeper {
    /// Starts the sweeper as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(queues: Arc<QueueCollection>, config: SweeperConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(queues, config, shutdown_rx));

        info!("Background queue sweeper started");

        Self { shutdown_tx }
    }

    /// Stops the sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Background queue sweeper stopped");
        }
    }
}

impl Drop for QueueSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    queues: Arc<QueueCollection>,
    config: SweeperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut current_interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Queue sweeper received shutdown signal");
                    return;
                }
            }
        }

        let expired = queues.cleanup_expired();
        let requeued = queues.requeue_stale_transactions();

        if expired + requeued > 0 {
            current_interval = (current_interval / 2).max(config.min_interval);
            debug!(
                expired = expired,
                requeued = requeued,
                new_interval_ms = current_interval.as_millis(),
                "Swept queues"
            );
        } else {
            current_interval = (current_interval * 2).min(config.max_interval);
            trace!(
                new_interval_ms = current_interval.as_millis(),
                "Nothing to sweep, slowing down"
            );
        }
    }
}

/// Starts the sweeper with default configuration.
pub fn start_sweeper(queues: Arc<QueueCollection>) -> QueueSweeper {
    QueueSweeper::start(queues, SweeperConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{QueueConfig, QueueEngine};
    use bytes::Bytes;
    use std::time::Instant;

    fn fast_config() -> SweeperConfig {
        SweeperConfig {
            base_interval: Duration::from_millis(10),
            min_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_items() {
        let queues = Arc::new(QueueCollection::new());
        for i in 0..10 {
            queues
                .add(
                    "q",
                    Bytes::from(format!("item{}", i)),
                    Some(Instant::now() + Duration::from_millis(30)),
                )
                .unwrap();
        }
        queues.add("q", Bytes::from("persistent"), None).unwrap();
        assert_eq!(queues.len("q"), 11);

        let _sweeper = QueueSweeper::start(Arc::clone(&queues), fast_config());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(queues.len("q"), 1);
    }

    #[tokio::test]
    async fn test_sweeper_requeues_abandoned_transactions() {
        let queues = Arc::new(QueueCollection::with_config(QueueConfig {
            max_items: 0,
            transaction_timeout: Some(Duration::from_millis(30)),
        }));
        queues.add("q", Bytes::from("job"), None).unwrap();
        let item = queues.remove("q", None, true, false).await.unwrap();
        assert!(item.xid.is_some());
        assert!(queues.is_empty("q"));

        let _sweeper = QueueSweeper::start(Arc::clone(&queues), fast_config());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(queues.open_transactions("q"), 0);
        assert_eq!(queues.len("q"), 1);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let queues = Arc::new(QueueCollection::new());

        {
            let _sweeper = QueueSweeper::start(Arc::clone(&queues), fast_config());
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        queues
            .add(
                "q",
                Bytes::from("late"),
                Some(Instant::now() + Duration::from_millis(10)),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        // Nobody swept, so the expired item is still stored.
        assert_eq!(queues.len("q"), 1);
        assert_eq!(queues.stats().total_expired, 0);
    }
}
