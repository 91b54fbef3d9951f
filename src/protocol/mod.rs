//! Line Protocol Implementation
//!
//! This module implements the text protocol spoken between queue clients
//! and the server.
//!
//! ## Overview
//!
//! Requests are newline-terminated lines (`\r` before `\n` is optional). A
//! request whose argument line ends with `:` carries a payload: every
//! following line is one item, up to a blank line. Responses are always a
//! single line.
//!
//! ## Modules
//!
//! - `types`: Defines `Command`, `Response` and response serialization
//! - `parser`: Incremental frame decoder for incoming bytes
//!
//! ## Example
//!
//! ```
//! use linequeue::protocol::{FrameDecoder, Response};
//! use bytes::Bytes;
//!
//! // Decoding incoming data
//! let mut decoder = FrameDecoder::new();
//! let (command, consumed) = decoder.decode(b"get work 500\n").unwrap();
//! assert_eq!(command.name, "get");
//! assert_eq!(consumed, 13);
//!
//! // Creating responses
//! let bytes = Response::item(Bytes::from("job-1")).serialize();
//! assert_eq!(bytes, b":job-1\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::FrameDecoder;
pub use types::{Command, Response};
