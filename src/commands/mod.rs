//! Command Module
//!
//! This module implements the command processing layer. It receives
//! decoded frames, validates them, executes them against the queue engine,
//! and returns the response to write back.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  FrameDecoder   │  (protocol module)
//! └────────┬────────┘
//!          │ Command
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Validate     │  Command -> Request
//! │  - Execute      │
//! │  - Track xids   │  TransactionTracker
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  QueueEngine    │  (queue module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `get <queue> [timeout_ms]` - reliable dequeue
//! - `peek <queue> [timeout_ms]` - read the head without removing it
//! - `put <queue> [expiry_ms]:` + payload lines - enqueue
//! - `confirm <queue>`, `abort <queue>` - resolve the outstanding read
//! - `flush <queue>`, `delete <queue>`
//! - `quit`

pub mod handler;
pub mod request;
pub mod tracker;

// Re-export the main command handler
pub use handler::{Clock, CommandHandler, Reply, SystemClock};
pub use request::{Request, RequestError};
pub use tracker::TransactionTracker;
