//! # linequeue - A Reliable Message-Queue Server
//!
//! linequeue serves named in-memory queues over a simple line-oriented text
//! protocol. Readers get items under a transaction: an item stays reserved
//! until the reader confirms it, and is handed out again if the reader
//! disappears first.
//!
//! ## Features
//!
//! - **Line Protocol**: `get`, `put`, `quit` and friends, one line per response
//! - **Reliable Reads**: at most one open read per queue per connection,
//!   confirmed automatically by the next `get`
//! - **Blocking Reads**: `get <queue> <timeout_ms>` waits for an item
//! - **Async I/O**: Built on Tokio for handling thousands of concurrent connections
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              linequeue                                  │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │ TransactionTracker      │
//! │  ┌─────────────┐           │                  ▼                         │
//! │  │ Connection  │<──────────┘    ┌──────────────────────────────────┐    │
//! │  │ Registry    │                │         QueueCollection          │    │
//! │  └─────────────┘                │  ┌───────┐ ┌───────┐ ┌───────┐   │    │
//! │  ┌─────────────┐                │  │ queue │ │ queue │ │  ...  │   │    │
//! │  │ Frame       │                │  └───────┘ └───────┘ └───────┘   │    │
//! │  │ Decoder     │                └──────────────────────────────────┘    │
//! │  └─────────────┘                                  ▲                     │
//! │                              ┌────────────────────┴──────────────────┐  │
//! │                              │            QueueSweeper               │  │
//! │                              │        (Background Tokio Task)        │  │
//! │                              └───────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use linequeue::connection::{handle_connection, ConnectionRegistry};
//! use linequeue::queue::{start_sweeper, QueueCollection};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let queues = Arc::new(QueueCollection::new());
//!     let _sweeper = start_sweeper(Arc::clone(&queues));
//!     let registry = Arc::new(ConnectionRegistry::new());
//!
//!     let listener = TcpListener::bind("127.0.0.1:22133").await.unwrap();
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await.unwrap();
//!         tokio::spawn(handle_connection(
//!             stream,
//!             addr,
//!             Arc::clone(&queues),
//!             Arc::clone(&registry),
//!         ));
//!     }
//! }
//! ```
//!
//! ## Protocol
//!
//! ```text
//! get <queue> [<timeout_ms>]      ->  :<item>  |  *
//! peek <queue> [<timeout_ms>]     ->  :<item>  |  *
//! put <queue> [<expiry_ms>]:      ->  +<count> |  -<error>
//! <item line>
//! ...
//! <blank line>
//! confirm <queue>                 ->  +<count>
//! abort <queue>                   ->  +<count>
//! flush <queue>                   ->  +<count>
//! delete <queue>                  ->  +<count>
//! quit                            ->  (connection closed)
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Frame decoder and response encoding
//! - [`commands`]: Per-connection command execution and transaction tracking
//! - [`connection`]: Client connection loop and the connection registry
//! - [`queue`]: Queue engine contract, in-memory engine and sweeper

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod queue;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types for convenience
pub use commands::{CommandHandler, TransactionTracker};
pub use connection::{handle_connection, ConnectionRegistry, ConnectionStats};
pub use protocol::{Command, FrameDecoder, Response};
pub use queue::{
    start_sweeper, QueueCollection, QueueConfig, QueueEngine, QueueSweeper, SweeperConfig,
};

/// The default port linequeue listens on
pub const DEFAULT_PORT: u16 = 22133;

/// The default host linequeue binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of linequeue
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
