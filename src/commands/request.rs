//! Typed Requests
//!
//! The frame decoder only splits bytes into verbs, arguments and payload
//! lines. This module checks that a decoded [`Command`] is one the server
//! understands and turns it into a [`Request`]. Any mismatch becomes a
//! [`RequestError`], which the caller reports to the client as an error
//! response while the connection stays open.

use crate::protocol::Command;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// A request the server knows how to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `get <queue> [timeout_ms]` - reliable dequeue
    Get {
        queue: String,
        timeout: Option<Duration>,
    },
    /// `peek <queue> [timeout_ms]` - look at the head without removing it
    Peek {
        queue: String,
        timeout: Option<Duration>,
    },
    /// `put <queue> [expiry_ms]:` followed by payload lines
    Put {
        queue: String,
        expiry: Option<Duration>,
        items: Vec<Bytes>,
    },
    /// `confirm <queue>` - acknowledge the outstanding read on `queue`
    Confirm { queue: String },
    /// `abort <queue>` - hand the outstanding read on `queue` back
    Abort { queue: String },
    /// `flush <queue>` - drop all pending items
    Flush { queue: String },
    /// `delete <queue>` - drop the queue
    Delete { queue: String },
    /// `quit`
    Quit,
}

/// Why a command was rejected before reaching the queue engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}'")]
    WrongArity(&'static str),

    #[error("invalid {what} '{value}'")]
    InvalidNumber { what: &'static str, value: String },

    #[error("'{0}' requires a payload")]
    MissingPayload(&'static str),

    #[error("'{0}' does not take a payload")]
    UnexpectedPayload(&'static str),
}

impl TryFrom<Command> for Request {
    type Error = RequestError;

    fn try_from(command: Command) -> Result<Self, Self::Error> {
        let Command {
            name,
            mut arguments,
            payload_items,
        } = command;

        let verb: &'static str = match name.as_str() {
            "" => return Err(RequestError::Empty),
            "get" => "get",
            "peek" => "peek",
            "put" => "put",
            "confirm" => "confirm",
            "abort" => "abort",
            "flush" => "flush",
            "delete" => "delete",
            "quit" => "quit",
            _ => return Err(RequestError::UnknownCommand(name)),
        };

        if verb == "put" {
            if payload_items.is_empty() {
                return Err(RequestError::MissingPayload(verb));
            }
        } else if !payload_items.is_empty() {
            return Err(RequestError::UnexpectedPayload(verb));
        }

        match verb {
            "quit" => {
                check_arity(verb, &arguments, 0, 0)?;
                Ok(Request::Quit)
            }
            "get" | "peek" => {
                check_arity(verb, &arguments, 1, 2)?;
                let timeout = optional_millis("timeout", arguments.get(1))?;
                let queue = arguments.swap_remove(0);
                Ok(if verb == "get" {
                    Request::Get { queue, timeout }
                } else {
                    Request::Peek { queue, timeout }
                })
            }
            "put" => {
                check_arity(verb, &arguments, 1, 2)?;
                let expiry = optional_millis("expiry", arguments.get(1))?;
                Ok(Request::Put {
                    queue: arguments.swap_remove(0),
                    expiry,
                    items: payload_items,
                })
            }
            _ => {
                check_arity(verb, &arguments, 1, 1)?;
                let queue = arguments.swap_remove(0);
                Ok(match verb {
                    "confirm" => Request::Confirm { queue },
                    "abort" => Request::Abort { queue },
                    "flush" => Request::Flush { queue },
                    _ => Request::Delete { queue },
                })
            }
        }
    }
}

fn check_arity(
    verb: &'static str,
    arguments: &[String],
    min: usize,
    max: usize,
) -> Result<(), RequestError> {
    if arguments.len() < min || arguments.len() > max {
        return Err(RequestError::WrongArity(verb));
    }
    Ok(())
}

/// Parses an optional millisecond count.
fn optional_millis(
    what: &'static str,
    value: Option<&String>,
) -> Result<Option<Duration>, RequestError> {
    value
        .map(|value| {
            value
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| RequestError::InvalidNumber {
                    what,
                    value: value.clone(),
                })
        })
        .transpose()
}
