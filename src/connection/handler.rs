//! Connection Handler Module
//!
//! This module handles individual client connections. Each client gets its
//! own handler task that runs in a loop, decoding frames and sending
//! responses.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. Connection registered, handler spawned            state: OPEN
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read bytes from socket  │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Decode next frame       │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Execute (may wait on    │ │  <- keeps buffering input
//!    │  │ the queue engine)       │ │     while a get waits
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Send response           │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. quit / client disconnects / shutdown              state: CLOSED
//!        │
//!        ▼
//! 5. Unconfirmed reads abandoned, connection deregistered
//! ```
//!
//! ## Ordering
//!
//! Frames are executed strictly one at a time in arrival order, and each
//! response is written before the next frame starts. A pending `get` that
//! is interrupted by a disconnect or shutdown is dropped without writing
//! anything.

use crate::commands::{CommandHandler, Reply};
use crate::connection::registry::{ConnectionRegistry, ConnectionStats, RegisteredConnection};
use crate::protocol::{Command, FrameDecoder, Response};
use crate::queue::QueueEngine;
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Maximum number of undecoded bytes buffered per connection (64 KB)
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Handles a single client connection.
///
/// Generic over the stream so it runs on a `TcpStream` in production and on
/// scripted streams in tests.
pub struct ConnectionHandler<S, E> {
    reader: ReadHalf<S>,
    writer: BufWriter<WriteHalf<S>>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Bytes received but not yet decoded into a frame
    buffer: BytesMut,

    decoder: FrameDecoder,

    /// Executes commands; owns this connection's transaction tracker
    commands: CommandHandler<E>,

    /// Our entry in the connection registry
    registration: RegisteredConnection,
}

impl<S, E> ConnectionHandler<S, E>
where
    S: AsyncRead + AsyncWrite,
    E: QueueEngine,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The byte stream for this connection
    /// * `addr` - The client's socket address
    /// * `commands` - The command handler for this connection
    /// * `registration` - This connection's registry entry
    pub fn new(
        stream: S,
        addr: SocketAddr,
        commands: CommandHandler<E>,
        registration: RegisteredConnection,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);

        Self {
            reader,
            writer: BufWriter::new(writer),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            decoder: FrameDecoder::new(),
            commands,
            registration,
        }
    }

    fn stats(&self) -> &ConnectionStats {
        self.registration.stats()
    }

    /// Runs the connection until the client quits, disconnects, or the
    /// server shuts down.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, id = self.registration.id(), "Client connected");

        let result = self.main_loop().await;

        let abandoned = self.commands.abandon();
        if abandoned > 0 {
            debug!(client = %self.addr, abandoned = abandoned, "Left unconfirmed reads open");
        }

        match &result {
            Ok(()) => info!(client = %self.addr, "Client quit"),
            Err(e) if e.is_disconnect() => {
                debug!(client = %self.addr, error = %e, "Client disconnected")
            }
            Err(ConnectionError::Shutdown) => {
                debug!(client = %self.addr, "Connection closed for shutdown")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        result
    }

    /// The main decode-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(command) = self.try_decode() {
                self.stats().command_processed();

                match self.execute(command).await? {
                    Reply::Respond(response) => self.send_response(&response).await?,
                    Reply::Close => {
                        self.close().await;
                        return Ok(());
                    }
                }
            }

            self.read_more_data().await?;
        }
    }

    /// Attempts to decode a frame from the buffer.
    fn try_decode(&mut self) -> Option<Command> {
        if self.buffer.is_empty() {
            return None;
        }

        match self.decoder.decode(&self.buffer) {
            Some((command, consumed)) => {
                self.buffer.advance(consumed);
                trace!(
                    client = %self.addr,
                    command = %command.name,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Decoded frame"
                );
                Some(command)
            }
            None => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete frame, need more data"
                );
                None
            }
        }
    }

    /// Executes one command.
    ///
    /// While the command waits on the queue engine, incoming bytes keep
    /// being buffered, and a disconnect or shutdown cancels the command.
    async fn execute(&mut self, command: Command) -> Result<Reply, ConnectionError> {
        let Self {
            reader,
            buffer,
            commands,
            registration,
            addr,
            ..
        } = self;

        let execute = commands.execute(command);
        tokio::pin!(execute);

        loop {
            let can_read = buffer.len() < MAX_BUFFER_SIZE;
            if can_read && buffer.capacity() - buffer.len() < 1024 {
                buffer.reserve(INITIAL_BUFFER_SIZE);
            }

            tokio::select! {
                biased;

                reply = &mut execute => return Ok(reply),

                _ = registration.shutdown_requested() => {
                    debug!(client = %addr, "Shutdown while command pending");
                    return Err(ConnectionError::Shutdown);
                }

                read = reader.read_buf(&mut *buffer), if can_read => {
                    let n = read?;
                    if n == 0 {
                        debug!(client = %addr, "Client went away while command pending");
                        return Err(ConnectionError::ClientDisconnected);
                    }
                    registration.stats().bytes_read(n);
                    trace!(client = %addr, bytes = n, "Buffered data while command pending");
                }
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = tokio::select! {
            biased;
            _ = self.registration.shutdown_requested() => return Err(ConnectionError::Shutdown),
            read = self.reader.read_buf(&mut self.buffer) => read?,
        };

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats().bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Sends a response to the client.
    ///
    /// Only called from the main loop, so a command cancelled by a
    /// disconnect or shutdown never gets here.
    async fn send_response(&mut self, response: &Response) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        self.stats().bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Sent response"
        );
        Ok(())
    }

    /// Shuts the write side down.
    async fn close(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            trace!(client = %self.addr, error = %e, "Error shutting down stream");
        }
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial frame)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,

    /// The server asked all connections to close
    #[error("Server shutting down")]
    Shutdown,
}

impl ConnectionError {
    /// True if the peer went away rather than something failing.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::ClientDisconnected | ConnectionError::UnexpectedEof => true,
            ConnectionError::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Handles a client connection.
///
/// Registers the connection, runs it to completion, and logs how it ended.
/// Failures only ever affect this one connection.
///
/// # Arguments
///
/// * `stream` - The TCP stream for this connection
/// * `addr` - The client's socket address
/// * `engine` - The shared queue engine
/// * `registry` - The process-wide connection registry
pub async fn handle_connection<E: QueueEngine>(
    stream: TcpStream,
    addr: SocketAddr,
    engine: Arc<E>,
    registry: Arc<ConnectionRegistry>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        trace!(client = %addr, error = %e, "Could not disable Nagle's algorithm");
    }

    let registration = registry.register(addr);
    let handler = ConnectionHandler::new(stream, addr, CommandHandler::new(engine), registration);
    if let Err(e) = handler.run().await {
        if !e.is_disconnect() && !matches!(e, ConnectionError::Shutdown) {
            debug!(client = %addr, error = %e, "Connection ended with error");
        }
    }
}
