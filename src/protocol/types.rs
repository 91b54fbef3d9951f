//! Line Protocol Data Types
//!
//! This module defines the request and response types of the text protocol.
//! Every frame is line-oriented: lines end with `\n`, and an optional `\r`
//! before it is ignored on input.
//!
//! ## Response Format
//!
//! Each response is a single line starting with a type prefix byte:
//! - `+` Count of items affected by a mutation
//! - `-` Error
//! - `*` Empty read (queue empty or wait timed out)
//! - `:` Item payload
//!
//! ## Examples
//!
//! Count: `+1\n`
//! Error: `-unknown command 'foo'\n`
//! Empty: `*\n`
//! Item: `:hello\n`

use bytes::Bytes;
use std::fmt;

/// The line terminator written on every response
pub const LF: u8 = b'\n';

/// Response type prefixes
pub mod prefix {
    pub const COUNT: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const EMPTY: u8 = b'*';
    pub const ITEM: u8 = b':';
}

/// A decoded request frame.
///
/// The decoder only handles framing: `name` is whatever verb the client
/// sent (lowercased), and checking that it means anything is left to the
/// command layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    /// Lowercased verb
    pub name: String,
    /// Whitespace-separated arguments following the verb
    pub arguments: Vec<String>,
    /// Payload lines of a multi-line command, in arrival order
    pub payload_items: Vec<Bytes>,
}

impl Command {
    /// Creates a command with no payload.
    pub fn new<S: Into<String>>(name: &str, arguments: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            arguments: arguments.into_iter().map(Into::into).collect(),
            payload_items: Vec::new(),
        }
    }

    /// Attaches payload items to the command.
    pub fn with_payload(mut self, items: impl IntoIterator<Item = Bytes>) -> Self {
        self.payload_items = items.into_iter().collect();
        self
    }
}

/// A response written back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Successful mutation, with the number of items affected.
    /// Format: `+<n>\n`
    Count(u64),

    /// The request was rejected or failed.
    /// Format: `-<message>\n`
    Error(String),

    /// Result of a read. `None` is written as `*\n`, `Some(data)` as `:<data>\n`.
    Item(Option<Bytes>),
}

impl Response {
    /// Creates a count response.
    pub fn count(n: u64) -> Self {
        Response::Count(n)
    }

    /// Creates an error response.
    ///
    /// # Example
    /// ```
    /// use linequeue::protocol::types::Response;
    /// let err = Response::error("Bad karma");
    /// assert_eq!(err.serialize(), b"-Bad karma\n");
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        Response::Error(s.into())
    }

    /// Creates an item response carrying `data`.
    pub fn item(data: impl Into<Bytes>) -> Self {
        Response::Item(Some(data.into()))
    }

    /// Creates the empty-read response.
    pub fn empty() -> Self {
        Response::Item(None)
    }

    /// Serializes the response to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the response into an existing buffer.
    ///
    /// No escaping is done: item payloads must not contain `\n`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Response::Count(n) => {
                buf.push(prefix::COUNT);
                buf.extend_from_slice(n.to_string().as_bytes());
            }
            Response::Error(msg) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(msg.as_bytes());
            }
            Response::Item(None) => {
                buf.push(prefix::EMPTY);
            }
            Response::Item(Some(data)) => {
                buf.push(prefix::ITEM);
                buf.extend_from_slice(data);
            }
        }
        buf.push(LF);
    }

    /// Returns true if this response is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Count(n) => write!(f, "(count) {}", n),
            Response::Error(msg) => write!(f, "(error) {}", msg),
            Response::Item(None) => write!(f, "(empty)"),
            Response::Item(Some(data)) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
        }
    }
}
