//! Connection Handler Module
//!
//! This module manages individual client connections. Each client
//! connection is handled by its own async task, so a client blocked on an
//! empty queue never holds up anyone else.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (main.rs)                                │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │──── register ───> ConnectionRegistry
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Decode frame│───>│ Execute cmd │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Send resp   │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Async I/O**: Uses Tokio for non-blocking network operations
//! - **Buffer Management**: Efficient BytesMut buffer for incoming data
//! - **Pipelining**: Frames are executed and answered strictly in order
//! - **Registry**: Live connections can be listed and told to shut down
//!
//! ## Example
//!
//! ```ignore
//! use linequeue::connection::{handle_connection, ConnectionRegistry};
//! use linequeue::queue::QueueCollection;
//! use std::sync::Arc;
//!
//! let queues = Arc::new(QueueCollection::new());
//! let registry = Arc::new(ConnectionRegistry::new());
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, Arc::clone(&queues), Arc::clone(&registry)));
//! ```

pub mod handler;
pub mod registry;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler};
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionStats, RegisteredConnection};
