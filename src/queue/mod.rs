//! Queue Storage Module
//!
//! This module holds everything the protocol layer consumes from queue
//! storage: the [`QueueEngine`] contract and an in-memory implementation of
//! it, plus a background sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     QueueCollection                         │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐                     │
//! │  │ "jobs"   │ │ "mail"   │ │ ...      │  created on demand  │
//! │  │ items    │ │ items    │ │          │                     │
//! │  │ open xids│ │ open xids│ │          │                     │
//! │  └──────────┘ └──────────┘ └──────────┘                     │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │       QueueSweeper        │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use linequeue::queue::{QueueCollection, QueueEngine};
//! use bytes::Bytes;
//!
//! # tokio_test::block_on(async {
//! let queues = QueueCollection::new();
//! queues.add("jobs", Bytes::from("job-1"), None).unwrap();
//!
//! // A reliable read parks the item until it is confirmed
//! let item = queues.remove("jobs", None, true, false).await.unwrap();
//! assert_eq!(queues.open_transactions("jobs"), 1);
//! queues.confirm_remove("jobs", item.xid.unwrap());
//! assert_eq!(queues.open_transactions("jobs"), 0);
//! # });
//! ```

pub mod engine;
pub mod sweeper;

// Re-export commonly used types
pub use engine::{QueueCollection, QueueConfig, QueueEngine, QueueError, QueueItem, QueueStats, Xid};
pub use sweeper::{start_sweeper, QueueSweeper, SweeperConfig};
