//! Command Handler
//!
//! Executes decoded commands for one connection against the queue engine.
//!
//! ## Reliable Reads
//!
//! `get` is always a reliable (transactional) read. The handler remembers
//! the transaction of the last item handed out on each queue in its
//! [`TransactionTracker`]. The next `get` on the same queue confirms that
//! transaction before asking for a new item, so a client that keeps reading
//! implicitly acknowledges what it already received. If the client goes
//! away instead, the open transactions are abandoned without a confirm and
//! the queue engine eventually delivers those items again.
//!
//! ```text
//!   get q ──> confirm previous xid (if any) ──> remove(q, deadline, txn)
//!                                                    │
//!                        ┌───────────────────────────┴─────────┐
//!                        ▼                                     ▼
//!                   None: `*`                 Some(item): track xid, `:<data>`
//! ```

use crate::commands::request::Request;
use crate::commands::tracker::TransactionTracker;
use crate::protocol::{Command, Response};
use crate::queue::{QueueEngine, QueueItem};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Source of the current time for deadline computation.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// What the connection should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Write this response and keep going
    Respond(Response),
    /// Close the connection without writing anything
    Close,
}

/// Executes commands for a single connection.
///
/// Not shared: each connection creates its own, since it carries that
/// connection's outstanding transactions.
pub struct CommandHandler<E> {
    /// The queue engine (shared across connections)
    engine: Arc<E>,
    /// Outstanding reliable reads of this connection
    tracker: TransactionTracker,
    clock: Arc<dyn Clock>,
}

impl<E: QueueEngine> CommandHandler<E> {
    /// Creates a new command handler using the system clock.
    pub fn new(engine: Arc<E>) -> Self {
        Self::with_clock(engine, Arc::new(SystemClock))
    }

    /// Creates a new command handler reading time from `clock`.
    pub fn with_clock(engine: Arc<E>, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine,
            tracker: TransactionTracker::new(),
            clock,
        }
    }

    /// The outstanding transactions of this connection.
    pub fn tracker(&self) -> &TransactionTracker {
        &self.tracker
    }

    /// Executes a command and returns what to send back.
    ///
    /// Malformed or unknown commands produce an error response; they never
    /// fail the connection.
    pub async fn execute(&mut self, command: Command) -> Reply {
        match Request::try_from(command) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                debug!(error = %e, "Rejected command");
                Reply::Respond(Response::error(e.to_string()))
            }
        }
    }

    /// Dispatches a request to its handler.
    async fn dispatch(&mut self, request: Request) -> Reply {
        let response = match request {
            Request::Get { queue, timeout } => self.cmd_get(&queue, timeout).await,
            Request::Peek { queue, timeout } => self.cmd_peek(&queue, timeout).await,
            Request::Put {
                queue,
                expiry,
                items,
            } => self.cmd_put(&queue, expiry, items),
            Request::Confirm { queue } => self.cmd_confirm(&queue),
            Request::Abort { queue } => self.cmd_abort(&queue),
            Request::Flush { queue } => Response::count(self.engine.flush(&queue) as u64),
            Request::Delete { queue } => Response::count(u64::from(self.engine.delete(&queue))),
            Request::Quit => return Reply::Close,
        };
        Reply::Respond(response)
    }

    /// Forgets every outstanding transaction without confirming it.
    ///
    /// Called once the connection is gone. Returns how many were abandoned.
    pub fn abandon(&mut self) -> usize {
        let abandoned = self.tracker.drain();
        for (queue, xid) in &abandoned {
            debug!(queue = %queue, xid = xid, "Abandoning unconfirmed read");
        }
        abandoned.len()
    }

    // ========================================================================
    // Command implementations
    // ========================================================================

    /// GET queue [timeout_ms]
    async fn cmd_get(&mut self, queue: &str, timeout: Option<Duration>) -> Response {
        let deadline = self.begin_read(queue, timeout);
        let item = self.engine.remove(queue, deadline, true, false).await;
        self.finish_read(queue, item)
    }

    /// First half of a reliable read: confirms the previous read on
    /// `queue` and computes the deadline for the next one.
    pub(crate) fn begin_read(&mut self, queue: &str, timeout: Option<Duration>) -> Option<Instant> {
        if let Some(xid) = self.tracker.remove(queue) {
            debug!(queue = %queue, xid = xid, "Confirming previous read");
            self.engine.confirm_remove(queue, xid);
        }
        timeout.map(|timeout| self.clock.now() + timeout)
    }

    /// Second half of a reliable read: tracks the delivered item.
    pub(crate) fn finish_read(&mut self, queue: &str, item: Option<QueueItem>) -> Response {
        match item {
            Some(item) => {
                if let Some(xid) = item.xid {
                    self.tracker.add(queue, xid);
                }
                Response::Item(Some(item.data))
            }
            None => Response::empty(),
        }
    }

    /// PEEK queue [timeout_ms]
    async fn cmd_peek(&self, queue: &str, timeout: Option<Duration>) -> Response {
        let deadline = timeout.map(|timeout| self.clock.now() + timeout);
        let item = self.engine.remove(queue, deadline, false, true).await;
        Response::Item(item.map(|item| item.data))
    }

    /// PUT queue [expiry_ms]: <items>
    ///
    /// Items are added one by one; the first rejection stops the batch.
    /// Items accepted before it stay queued.
    fn cmd_put(&self, queue: &str, expiry: Option<Duration>, items: Vec<Bytes>) -> Response {
        let expires_at = expiry.map(|expiry| self.clock.now() + expiry);
        let mut accepted = 0u64;

        for data in items {
            if let Err(e) = self.engine.add(queue, data, expires_at) {
                debug!(queue = %queue, accepted = accepted, error = %e, "Put rejected");
                return Response::error(e.to_string());
            }
            accepted += 1;
        }

        Response::count(accepted)
    }

    /// CONFIRM queue
    fn cmd_confirm(&mut self, queue: &str) -> Response {
        match self.tracker.remove(queue) {
            Some(xid) => {
                self.engine.confirm_remove(queue, xid);
                Response::count(1)
            }
            None => Response::count(0),
        }
    }

    /// ABORT queue
    fn cmd_abort(&mut self, queue: &str) -> Response {
        match self.tracker.remove(queue) {
            Some(xid) => Response::count(u64::from(self.engine.unremove(queue, xid))),
            None => Response::count(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FrozenClock, MockEngine};

    fn create_handler() -> (CommandHandler<MockEngine>, Arc<MockEngine>, Instant) {
        let engine = Arc::new(MockEngine::new());
        let now = Instant::now();
        let handler = CommandHandler::with_clock(Arc::clone(&engine), Arc::new(FrozenClock(now)));
        (handler, engine, now)
    }

    fn get(queue: &str) -> Command {
        Command::new("get", [queue])
    }

    fn remove_call(queue: &str, deadline: Option<Instant>) -> Call {
        Call::Remove {
            queue: queue.to_string(),
            deadline,
            transactional: true,
            peek: false,
        }
    }

    #[tokio::test]
    async fn test_get_returns_item_and_tracks_it() {
        let (mut handler, engine, _) = create_handler();
        engine.will_return("hello", 7);

        let reply = handler.execute(get("test")).await;
        assert_eq!(reply, Reply::Respond(Response::item(Bytes::from("hello"))));
        assert_eq!(handler.tracker().size("test"), 1);
        assert_eq!(engine.calls(), vec![remove_call("test", None)]);
    }

    #[tokio::test]
    async fn test_get_on_empty_queue() {
        let (mut handler, engine, _) = create_handler();
        engine.will_return_nothing();

        let reply = handler.execute(get("test")).await;
        assert_eq!(reply, Reply::Respond(Response::empty()));
        assert_eq!(handler.tracker().size("test"), 0);
    }

    #[tokio::test]
    async fn test_second_get_confirms_first() {
        let (mut handler, engine, _) = create_handler();
        engine.will_return("one", 7).will_return("two", 8);

        handler.execute(get("test")).await;
        handler.execute(get("test")).await;

        assert_eq!(
            engine.calls(),
            vec![
                remove_call("test", None),
                Call::Confirm {
                    queue: "test".to_string(),
                    xid: 7
                },
                remove_call("test", None),
            ]
        );
        assert_eq!(handler.tracker().size("test"), 1);
        assert_eq!(handler.tracker().len(), 1);
    }

    #[tokio::test]
    async fn test_tracker_empty_while_second_get_pending() {
        let (mut handler, engine, _) = create_handler();
        engine.will_return("one", 7);
        handler.execute(get("test")).await;
        assert_eq!(handler.tracker().size("test"), 1);

        handler.begin_read("test", None);
        assert_eq!(handler.tracker().size("test"), 0);
        assert_eq!(engine.confirms().len(), 1);

        let item = QueueItem {
            added_at: Instant::now(),
            expires_at: None,
            data: Bytes::from("two"),
            xid: Some(8),
        };
        handler.finish_read("test", Some(item));
        assert_eq!(handler.tracker().size("test"), 1);
    }

    #[tokio::test]
    async fn test_get_other_queue_does_not_confirm() {
        let (mut handler, engine, _) = create_handler();
        engine.will_return("one", 7).will_return("two", 1);

        handler.execute(get("a")).await;
        handler.execute(get("b")).await;

        assert!(engine.confirms().is_empty());
        assert_eq!(handler.tracker().len(), 2);
    }

    #[tokio::test]
    async fn test_get_timeout_sets_deadline() {
        let (mut handler, engine, now) = create_handler();

        handler.execute(Command::new("get", ["test", "500"])).await;

        assert_eq!(
            engine.calls(),
            vec![remove_call("test", Some(now + Duration::from_millis(500)))]
        );
    }

    #[tokio::test]
    async fn test_put_single_item() {
        let (mut handler, engine, _) = create_handler();

        let command = Command::new("put", ["test"]).with_payload([Bytes::from("hello")]);
        let reply = handler.execute(command).await;

        assert_eq!(reply, Reply::Respond(Response::count(1)));
        assert_eq!(
            engine.calls(),
            vec![Call::Add {
                queue: "test".to_string(),
                data: Bytes::from("hello"),
                expiry: None
            }]
        );
    }

    #[tokio::test]
    async fn test_put_with_expiry() {
        let (mut handler, engine, now) = create_handler();

        let command = Command::new("put", ["test", "60000"]).with_payload([Bytes::from("x")]);
        handler.execute(command).await;

        assert_eq!(
            engine.calls(),
            vec![Call::Add {
                queue: "test".to_string(),
                data: Bytes::from("x"),
                expiry: Some(now + Duration::from_secs(60))
            }]
        );
    }

    #[tokio::test]
    async fn test_put_stops_at_first_rejection() {
        let (mut handler, engine, _) = create_handler();
        engine.accept_only(1);

        let command = Command::new("put", ["test"]).with_payload([
            Bytes::from("a"),
            Bytes::from("b"),
            Bytes::from("c"),
        ]);
        let reply = handler.execute(command).await;

        assert_eq!(
            reply,
            Reply::Respond(Response::error("queue 'test' is full"))
        );
        assert_eq!(engine.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_peek_is_not_tracked() {
        let (mut handler, engine, _) = create_handler();
        engine.will_return("head", 3);

        let reply = handler.execute(Command::new("peek", ["test"])).await;
        assert_eq!(reply, Reply::Respond(Response::item(Bytes::from("head"))));
        assert_eq!(handler.tracker().size("test"), 0);
        assert_eq!(
            engine.calls(),
            vec![Call::Remove {
                queue: "test".to_string(),
                deadline: None,
                transactional: false,
                peek: true
            }]
        );
    }

    #[tokio::test]
    async fn test_explicit_confirm_and_abort() {
        let (mut handler, engine, _) = create_handler();
        engine.will_return("one", 7).will_return("two", 8);

        handler.execute(get("test")).await;
        let reply = handler.execute(Command::new("confirm", ["test"])).await;
        assert_eq!(reply, Reply::Respond(Response::count(1)));
        let reply = handler.execute(Command::new("confirm", ["test"])).await;
        assert_eq!(reply, Reply::Respond(Response::count(0)));

        handler.execute(get("test")).await;
        let reply = handler.execute(Command::new("abort", ["test"])).await;
        assert_eq!(reply, Reply::Respond(Response::count(1)));
        assert_eq!(handler.tracker().size("test"), 0);

        let calls = engine.calls();
        assert!(calls.contains(&Call::Unremove {
            queue: "test".to_string(),
            xid: 8
        }));
        assert_eq!(engine.confirms().len(), 1);
    }

    #[tokio::test]
    async fn test_abandon_does_not_confirm() {
        let (mut handler, engine, _) = create_handler();
        engine.will_return("one", 7);

        handler.execute(get("test")).await;
        assert_eq!(handler.abandon(), 1);

        assert!(handler.tracker().is_empty());
        assert!(engine.confirms().is_empty());
    }

    #[tokio::test]
    async fn test_quit_closes() {
        let (mut handler, _, _) = create_handler();
        assert_eq!(
            handler.execute(Command::new("quit", Vec::<String>::new())).await,
            Reply::Close
        );
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (mut handler, engine, _) = create_handler();

        let reply = handler.execute(Command::new("bogus", ["x"])).await;
        assert_eq!(
            reply,
            Reply::Respond(Response::error("unknown command 'bogus'"))
        );
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_flush_and_delete_counts() {
        let (mut handler, engine, _) = create_handler();

        let reply = handler.execute(Command::new("flush", ["test"])).await;
        assert_eq!(reply, Reply::Respond(Response::count(0)));
        let reply = handler.execute(Command::new("delete", ["test"])).await;
        assert_eq!(reply, Reply::Respond(Response::count(0)));
        assert_eq!(engine.calls().len(), 2);
    }
}
