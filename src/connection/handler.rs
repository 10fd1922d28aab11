//! Connection Handler Module
//!
//! This module serves a single accepted connection. Every connection carries
//! exactly one request and gets at most one reply, after which it is closed.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Accepted (handed over by a worker)
//!        │
//!        ▼
//! 2. ReadingHeader ── short read ──────────────┐
//!        │                                     │
//!        ▼                                     │
//! 3. ReadingPayload (STORE only) ── short read ┤
//!        │                                     │
//!        ▼                                     │
//! 4. Dispatched (CommandHandler on the         │
//!    blocking pool)                            │
//!        │                                     │
//!        ▼                                     │
//! 5. ResponseSent (header, then payload)       │
//!        │                                     │
//!        ▼                                     ▼
//! 6. Closed  <─────────── abandoned, no reply ─┘
//! ```
//!
//! A header that arrives complete but does not decode (unknown operation,
//! unterminated filename) still gets a failure reply. A connection that
//! closes mid-frame gets nothing.

use crate::commands::{CommandHandler, Reply};
use crate::protocol::{decode_request, encode_response, Operation, ProtocolError, REQUEST_FRAME_LEN};
use bytes::Bytes;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Largest STORE payload accepted by default (512 MB)
pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 512 * 1024 * 1024;

/// Default deadline for each read or write phase
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Initial payload buffer capacity; larger payloads grow the buffer as they arrive
const INITIAL_PAYLOAD_CAPACITY: usize = 64 * 1024;

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// STORE requests declaring more bytes than this are refused unread
    pub max_payload_size: u64,
    /// Deadline for reading the header, reading the payload and writing the
    /// reply, each measured separately. `None` waits forever.
    pub io_timeout: Option<Duration>,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            io_timeout: Some(DEFAULT_IO_TIMEOUT),
        }
    }
}

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Connections currently being served
    pub active_connections: AtomicU64,
    /// Requests that reached the command handler
    pub requests_processed: AtomicU64,
    /// Headers that arrived complete but could not be decoded
    pub protocol_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn request_processed(&self) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Serves one request on one connection.
///
/// Generic over the stream so it runs on a `TcpStream` in production and on
/// in-memory mocks in tests.
pub struct ConnectionHandler<S> {
    /// The client stream
    stream: S,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// The command handler (shared across connections)
    command_handler: CommandHandler,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    limits: ConnectionLimits,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The client stream
    /// * `addr` - The client's socket address
    /// * `command_handler` - The command handler for executing requests
    /// * `stats` - Shared connection statistics
    /// * `limits` - Payload and deadline limits
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
        limits: ConnectionLimits,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream,
            addr,
            command_handler,
            stats,
            limits,
        }
    }

    /// Serves the connection to completion and closes it.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "Serving connection");

        let result = self.serve().await;

        match &result {
            Ok(()) => debug!(client = %self.addr, "Request served"),
            Err(ConnectionError::UnexpectedEof) => {
                debug!(client = %self.addr, "Client closed mid-frame, abandoning connection")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        // One request per connection: close whatever happened.
        let _ = self.stream.shutdown().await;
        self.stats.connection_closed();
        result
    }

    /// Reads the request, executes it and writes the reply.
    async fn serve(&mut self) -> Result<(), ConnectionError> {
        let mut header = [0u8; REQUEST_FRAME_LEN];
        let limit = self.limits.io_timeout;
        with_deadline(limit, self.stream.read_exact(&mut header)).await?;
        self.stats.bytes_read(header.len());

        let request = match decode_request(&header) {
            Ok(request) => request,
            Err(e) => {
                self.stats.protocol_error();
                warn!(client = %self.addr, error = %e, "Rejected malformed request");
                let message = match e {
                    ProtocolError::UnknownOperation(_) => "Invalid operation".to_string(),
                    other => format!("Invalid request: {}", other),
                };
                return self.send_reply(&Reply::failure(message)).await;
            }
        };

        trace!(
            client = %self.addr,
            operation = %request.operation,
            filename = %request.filename,
            data_size = request.data_size,
            "Decoded request header"
        );

        let payload = if request.operation == Operation::Store {
            if request.data_size > self.limits.max_payload_size {
                warn!(
                    client = %self.addr,
                    size = request.data_size,
                    max = self.limits.max_payload_size,
                    "Payload too large"
                );
                let message = format!(
                    "Payload too large: {} bytes (max: {})",
                    request.data_size, self.limits.max_payload_size
                );
                return self.send_reply(&Reply::failure(message)).await;
            }
            self.read_payload(request.data_size).await?
        } else {
            Bytes::new()
        };

        let handler = self.command_handler.clone();
        let reply = tokio::task::spawn_blocking(move || handler.execute(&request, payload))
            .await
            .map_err(|e| ConnectionError::Worker(e.to_string()))?;
        self.stats.request_processed();

        self.send_reply(&reply).await
    }

    /// Reads exactly `size` payload bytes, growing the buffer as data arrives.
    async fn read_payload(&mut self, size: u64) -> Result<Bytes, ConnectionError> {
        let capacity = usize::try_from(size)
            .unwrap_or(usize::MAX)
            .min(INITIAL_PAYLOAD_CAPACITY);
        let mut buf = Vec::with_capacity(capacity);

        let limit = self.limits.io_timeout;
        let reader = (&mut self.stream).take(size);
        with_deadline(limit, read_all(reader, &mut buf)).await?;
        self.stats.bytes_read(buf.len());

        if (buf.len() as u64) < size {
            trace!(
                client = %self.addr,
                expected = size,
                received = buf.len(),
                "Payload truncated"
            );
            return Err(ConnectionError::UnexpectedEof);
        }

        Ok(Bytes::from(buf))
    }

    /// Writes the reply header and, if present, its payload.
    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let header = encode_response(&reply.header);
        let limit = self.limits.io_timeout;

        with_deadline(limit, self.stream.write_all(&header)).await?;
        let mut written = header.len();

        if let Some(body) = reply.body.as_ref().filter(|body| !body.is_empty()) {
            with_deadline(limit, self.stream.write_all(body)).await?;
            written += body.len();
        }

        with_deadline(limit, self.stream.flush()).await?;
        self.stats.bytes_written(written);
        trace!(
            client = %self.addr,
            bytes = written,
            success = reply.header.success,
            "Sent reply"
        );
        Ok(())
    }
}

async fn read_all<R>(mut reader: R, buf: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    reader.read_to_end(buf).await
}

/// Runs an I/O future under an optional deadline.
async fn with_deadline<F, T>(limit: Option<Duration>, fut: F) -> Result<T, ConnectionError>
where
    F: Future<Output = io::Result<T>>,
{
    let result = match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ConnectionError::TimedOut)?,
        None => fut.await,
    };

    result.map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ConnectionError::UnexpectedEof,
        _ => ConnectionError::IoError(e),
    })
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// The peer closed before a full header or payload arrived
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// A read or write phase exceeded its deadline
    #[error("Connection timed out")]
    TimedOut,

    /// The blocking task running the request failed
    #[error("Request worker failed: {0}")]
    Worker(String),
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
///
/// # Arguments
///
/// * `stream` - The client stream
/// * `addr` - The client's socket address
/// * `command_handler` - The command handler for executing requests
/// * `stats` - Shared connection statistics
/// * `limits` - Payload and deadline limits
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    limits: ConnectionLimits,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats, limits);
    if let Err(e) = handler.run().await {
        debug!(client = %addr, error = %e, "Connection ended with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_request, RequestFrame, ResponseFrame};
    use crate::storage::FileStore;
    use tokio_test::io::Builder;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn create_handler() -> CommandHandler {
        CommandHandler::new(Arc::new(FileStore::in_memory(16)))
    }

    fn request(frame: RequestFrame) -> Vec<u8> {
        encode_request(&frame).unwrap().to_vec()
    }

    fn response(frame: ResponseFrame) -> Vec<u8> {
        encode_response(&frame).to_vec()
    }

    async fn serve<S>(stream: S, handler: CommandHandler) -> (Result<(), ConnectionError>, Arc<ConnectionStats>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let stats = Arc::new(ConnectionStats::new());
        let conn = ConnectionHandler::new(
            stream,
            test_addr(),
            handler,
            Arc::clone(&stats),
            ConnectionLimits::default(),
        );
        (conn.run().await, stats)
    }

    #[tokio::test]
    async fn test_store_reply() {
        let handler = create_handler();
        let mock = Builder::new()
            .read(&request(RequestFrame::store("a.txt", 5)))
            .read(b"hello")
            .write(&response(ResponseFrame::success("File stored successfully", 5)))
            .build();

        let (result, stats) = serve(mock, handler.clone()).await;

        assert!(result.is_ok());
        assert_eq!(
            handler.store().retrieve("a.txt").unwrap(),
            Bytes::from("hello")
        );
        assert_eq!(stats.requests_processed.load(Ordering::Relaxed), 1);
        assert_eq!(
            stats.bytes_read.load(Ordering::Relaxed),
            (REQUEST_FRAME_LEN + 5) as u64
        );
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_payload_split_across_reads() {
        let handler = create_handler();
        let mock = Builder::new()
            .read(&request(RequestFrame::store("a", 6)))
            .read(b"ab")
            .read(b"cd")
            .read(b"ef")
            .write(&response(ResponseFrame::success("File stored successfully", 6)))
            .build();

        let (result, _) = serve(mock, handler.clone()).await;

        assert!(result.is_ok());
        assert_eq!(handler.store().retrieve("a").unwrap(), Bytes::from("abcdef"));
    }

    #[tokio::test]
    async fn test_retrieve_sends_header_then_body() {
        let handler = create_handler();
        handler
            .store()
            .store("a.txt", Bytes::from("hello"))
            .unwrap();

        let mock = Builder::new()
            .read(&request(RequestFrame::retrieve("a.txt")))
            .write(&response(ResponseFrame::success(
                "File retrieved successfully",
                5,
            )))
            .write(b"hello")
            .build();

        let (result, _) = serve(mock, handler).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_retrieve_missing() {
        let mock = Builder::new()
            .read(&request(RequestFrame::retrieve("nope")))
            .write(&response(ResponseFrame::failure("File not found")))
            .build();

        let (result, _) = serve(mock, create_handler()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_short_header_gets_no_reply() {
        let header = request(RequestFrame::retrieve("a"));
        let mock = Builder::new().read(&header[..100]).build();

        let (result, stats) = serve(mock, create_handler()).await;

        assert!(matches!(result, Err(ConnectionError::UnexpectedEof)));
        assert_eq!(stats.requests_processed.load(Ordering::Relaxed), 0);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_truncated_payload_creates_no_record() {
        let handler = create_handler();
        let mock = Builder::new()
            .read(&request(RequestFrame::store("partial", 10)))
            .read(b"abc")
            .build();

        let (result, _) = serve(mock, handler.clone()).await;

        assert!(matches!(result, Err(ConnectionError::UnexpectedEof)));
        assert!(!handler.store().exists("partial"));
    }

    #[tokio::test]
    async fn test_unknown_operation_gets_failure_reply() {
        let mut header = request(RequestFrame::list());
        header[0..4].copy_from_slice(&42u32.to_le_bytes());

        let mock = Builder::new()
            .read(&header)
            .write(&response(ResponseFrame::failure("Invalid operation")))
            .build();

        let (result, stats) = serve(mock, create_handler()).await;

        assert!(result.is_ok());
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_oversized_payload_refused_unread() {
        let handler = create_handler();
        let stats = Arc::new(ConnectionStats::new());
        let mock = Builder::new()
            .read(&request(RequestFrame::store("big", 1_000)))
            .write(&response(ResponseFrame::failure(
                "Payload too large: 1000 bytes (max: 100)",
            )))
            .build();

        let limits = ConnectionLimits {
            max_payload_size: 100,
            io_timeout: None,
        };
        let conn = ConnectionHandler::new(mock, test_addr(), handler.clone(), stats, limits);

        assert!(conn.run().await.is_ok());
        assert!(!handler.store().exists("big"));
    }

    #[tokio::test]
    async fn test_stalled_header_times_out_without_reply() {
        let header = request(RequestFrame::retrieve("a"));
        let mock = Builder::new()
            .read(&header[..10])
            .wait(Duration::from_secs(5))
            .build();

        let stats = Arc::new(ConnectionStats::new());
        let limits = ConnectionLimits {
            io_timeout: Some(Duration::from_millis(50)),
            ..ConnectionLimits::default()
        };
        let conn = ConnectionHandler::new(mock, test_addr(), create_handler(), Arc::clone(&stats), limits);

        assert!(matches!(conn.run().await, Err(ConnectionError::TimedOut)));
        assert_eq!(stats.requests_processed.load(Ordering::Relaxed), 0);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 0);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_stalled_payload_times_out_without_record() {
        let handler = create_handler();
        let mock = Builder::new()
            .read(&request(RequestFrame::store("slow", 8)))
            .read(b"abcd")
            .wait(Duration::from_secs(5))
            .build();

        let limits = ConnectionLimits {
            io_timeout: Some(Duration::from_millis(50)),
            ..ConnectionLimits::default()
        };
        let conn = ConnectionHandler::new(
            mock,
            test_addr(),
            handler.clone(),
            Arc::new(ConnectionStats::new()),
            limits,
        );

        assert!(matches!(conn.run().await, Err(ConnectionError::TimedOut)));
        assert!(!handler.store().exists("slow"));
    }
}
