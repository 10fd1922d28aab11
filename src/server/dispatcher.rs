//! Request Dispatcher
//!
//! Binds the listening socket and runs the acceptor/worker-pool front end.
//!
//! ## Design
//!
//! ```text
//!             ┌──────────────┐
//!  accept() ─>│   Acceptor   │  (single producer)
//!             └──────┬───────┘
//!                    │ send (waits when the queue is full)
//!                    ▼
//!        ┌──────────────────────────┐
//!        │ bounded mpsc queue       │
//!        │ (TcpStream, SocketAddr)  │
//!        └──┬─────────┬─────────┬───┘
//!           │         │         │  recv, one at a time
//!           ▼         ▼         ▼
//!       worker 0  worker 1 … worker N-1
//! ```
//!
//! Each worker serves one connection to completion before taking the next,
//! so at most N requests are in flight at once.
//!
//! ## Shutdown
//!
//! The [`ServerHandle`] flips a `watch` flag. The acceptor leaves its loop,
//! closing the listener and dropping the queue sender. Workers finish the
//! connections already queued, see the closed queue and exit. `shutdown`
//! returns once every task has been joined.

use crate::commands::CommandHandler;
use crate::connection::{
    handle_connection, ConnectionLimits, ConnectionStats, DEFAULT_IO_TIMEOUT,
    DEFAULT_MAX_PAYLOAD_SIZE,
};
use crate::storage::{FileStore, StorageError, DEFAULT_CACHE_CAPACITY};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Default number of worker tasks
pub const DEFAULT_WORKERS: usize = 4;

/// Default number of accepted connections that may wait for a worker
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type Queued = (TcpStream, SocketAddr);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    /// Directory holding file data and the metadata snapshot
    pub storage_root: PathBuf,
    /// Peer nodes that receive a replica of every stored file
    pub peers: Vec<String>,
    /// Number of worker tasks
    pub workers: usize,
    /// Maximum number of payloads kept in the recency cache
    pub cache_capacity: usize,
    /// Maximum number of accepted connections waiting for a worker
    pub queue_capacity: usize,
    /// Largest STORE payload accepted
    pub max_payload_size: u64,
    /// Deadline for each read or write phase of a connection
    pub io_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            storage_root: PathBuf::from("storage"),
            peers: Vec::new(),
            workers: DEFAULT_WORKERS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            io_timeout: Some(DEFAULT_IO_TIMEOUT),
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-connection limits derived from this configuration
    pub fn limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            max_payload_size: self.max_payload_size,
            io_timeout: self.io_timeout,
        }
    }

    fn validate(&self) -> Result<(), ServerError> {
        if self.workers == 0 {
            return Err(ServerError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ServerError::InvalidConfig(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Errors that stop the server from starting or running.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be created or bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The storage directory could not be opened
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The configuration cannot be served
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A bound, not yet running, request dispatcher.
pub struct RequestDispatcher {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    workers: usize,
    queue_capacity: usize,
    limits: ConnectionLimits,
}

impl RequestDispatcher {
    /// Binds the listening socket for `config`, serving requests with `handler`.
    pub async fn bind(config: &ServerConfig, handler: CommandHandler) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            handler,
            stats: Arc::new(ConnectionStats::new()),
            workers: config.workers,
            queue_capacity: config.queue_capacity,
            limits: config.limits(),
        })
    }

    /// Opens the file store under `config.storage_root` and binds a dispatcher for it.
    pub async fn open(config: &ServerConfig) -> Result<Self, ServerError> {
        let store = FileStore::open_dir(&config.storage_root, config.cache_capacity)?;
        info!(
            root = %config.storage_root.display(),
            files = store.total_files(),
            cache_capacity = config.cache_capacity,
            "File store opened"
        );

        let handler = CommandHandler::new(Arc::new(store)).with_peers(config.peers.clone());
        Self::bind(config, handler).await
    }

    /// The address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared connection statistics
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Starts the acceptor and the worker pool.
    pub fn spawn(self) -> ServerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (queue_tx, queue_rx) = mpsc::channel::<Queued>(self.queue_capacity);
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let workers = (0..self.workers)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&queue_rx),
                    self.handler.clone(),
                    Arc::clone(&self.stats),
                    self.limits,
                ))
            })
            .collect();

        let acceptor = tokio::spawn(accept_loop(
            self.listener,
            queue_tx,
            Arc::clone(&self.stats),
            shutdown_rx,
        ));

        info!(
            addr = %self.local_addr,
            workers = self.workers,
            queue_capacity = self.queue_capacity,
            "Dispatcher started"
        );

        ServerHandle {
            local_addr: self.local_addr,
            stats: self.stats,
            shutdown_tx,
            acceptor,
            workers,
        }
    }

    /// Serves requests until `signal` completes, then shuts down gracefully.
    pub async fn run_until<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        let handle = self.spawn();
        signal.await;
        handle.shutdown().await;
    }
}

/// Handle to a running dispatcher.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stats: Arc<ConnectionStats>,
    shutdown_tx: watch::Sender<bool>,
    acceptor: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// The address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared connection statistics
    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Number of worker tasks
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting, lets workers drain the queue, and joins every task.
    pub async fn shutdown(self) {
        info!("Shutting down dispatcher");
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.acceptor.await {
            error!(error = %e, "Acceptor task failed");
        }

        for (id, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!(worker = id, error = %e, "Worker task failed");
            }
        }

        info!("Dispatcher stopped");
    }
}

/// Accepts connections and queues them until shutdown.
async fn accept_loop(
    listener: TcpListener,
    queue: mpsc::Sender<Queued>,
    stats: Arc<ConnectionStats>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Acceptor received shutdown signal");
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        stats.connection_accepted();
                        trace!(client = %addr, "Accepted connection");

                        // A full queue holds the acceptor here until a worker frees a slot.
                        tokio::select! {
                            sent = queue.send((stream, addr)) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                            _ = shutdown_rx.changed() => {
                                debug!(client = %addr, "Dropping connection accepted during shutdown");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }
    }

    // Dropping the listener and the sender here closes the socket and
    // wakes every idle worker.
    drop(listener);
    drop(queue);
    debug!("Acceptor stopped");
}

/// Takes connections off the shared queue one at a time until it closes.
async fn worker_loop(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Queued>>>,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    limits: ConnectionLimits,
) {
    debug!(worker = id, "Worker started");

    loop {
        let next = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };

        let Some((stream, addr)) = next else {
            break;
        };

        debug!(worker = id, client = %addr, "Worker picked up connection");
        handle_connection(stream, addr, handler.clone(), Arc::clone(&stats), limits).await;
    }

    debug!(worker = id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, StorageClient};
    use crate::protocol::{decode_response, encode_request, RequestFrame, RESPONSE_FRAME_LEN};
    use bytes::Bytes;
    use std::sync::atomic::Ordering;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            ..ServerConfig::default()
        }
    }

    async fn start() -> (ServerHandle, Arc<FileStore>, StorageClient) {
        let store = Arc::new(FileStore::in_memory(16));
        let handler = CommandHandler::new(Arc::clone(&store));
        let dispatcher = RequestDispatcher::bind(&test_config(), handler)
            .await
            .unwrap();
        let handle = dispatcher.spawn();
        let client = StorageClient::new(handle.local_addr().to_string());
        (handle, store, client)
    }

    /// Writes a complete STORE request and leaves the reply unread.
    async fn send_store(addr: SocketAddr, name: &str, data: &[u8]) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let header = encode_request(&RequestFrame::store(name, data.len() as u64)).unwrap();
        stream.write_all(&header).await.unwrap();
        stream.write_all(data).await.unwrap();
        stream
    }

    async fn read_reply(stream: &mut TcpStream) -> crate::protocol::ResponseFrame {
        let mut buf = [0u8; RESPONSE_FRAME_LEN];
        stream.read_exact(&mut buf).await.unwrap();
        decode_response(&buf).unwrap()
    }

    #[tokio::test]
    async fn test_store_then_retrieve() {
        let (handle, store, client) = start().await;

        let size = client.store("a.txt", Bytes::from("hello")).await.unwrap();
        assert_eq!(size, 5);
        assert_eq!(client.retrieve("a.txt").await.unwrap(), Bytes::from("hello"));
        assert!(store.exists("a.txt"));

        handle.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_distinct_stores() {
        let (handle, store, client) = start().await;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let name = format!("file-{}", i);
                let data = Bytes::from(format!("payload {}", i));
                client.store(&name, data).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.total_files(), 16);
        for i in 0..16 {
            let data = client.retrieve(&format!("file-{}", i)).await.unwrap();
            assert_eq!(data, Bytes::from(format!("payload {}", i)));
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_retrieve_missing_reports_failure() {
        let (handle, _store, client) = start().await;

        match client.retrieve("missing").await {
            Err(ClientError::Server(message)) => assert_eq!(message, "File not found"),
            other => panic!("expected server failure, got {:?}", other),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let (handle, _store, client) = start().await;

        client.store("b", Bytes::from("22")).await.unwrap();
        client.store("a", Bytes::from("1")).await.unwrap();
        assert_eq!(
            client.list().await.unwrap(),
            "a (1 bytes)\nb (2 bytes)\n"
        );

        client.delete("a").await.unwrap();
        assert_eq!(client.list().await.unwrap(), "b (2 bytes)\n");
        assert!(matches!(
            client.delete("a").await,
            Err(ClientError::Server(_))
        ));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_short_payload_leaves_no_record() {
        let (handle, store, _client) = start().await;

        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        let header = encode_request(&RequestFrame::store("partial", 100)).unwrap();
        stream.write_all(&header).await.unwrap();
        stream.write_all(b"only a few bytes").await.unwrap();
        stream.shutdown().await.unwrap();

        // The server closes without replying.
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
        assert!(!store.exists("partial"));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_long_filename_rejected_by_client() {
        let (handle, store, client) = start().await;

        let name = "x".repeat(300);
        assert!(matches!(
            client.store(&name, Bytes::from("data")).await,
            Err(ClientError::Protocol(_))
        ));
        assert_eq!(store.total_files(), 0);
        assert_eq!(handle.stats().requests_processed.load(Ordering::Relaxed), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_joins_workers() {
        let (handle, _store, client) = start().await;
        let addr = handle.local_addr();
        assert_eq!(handle.worker_count(), DEFAULT_WORKERS);

        client.store("a", Bytes::from("x")).await.unwrap();
        let stats = Arc::clone(handle.stats());
        handle.shutdown().await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let config = ServerConfig {
            workers: 0,
            ..test_config()
        };
        let handler = CommandHandler::new(Arc::new(FileStore::in_memory(1)));

        assert!(matches!(
            RequestDispatcher::bind(&config, handler).await,
            Err(ServerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let (handle, _store, _client) = start().await;
        let config = ServerConfig {
            port: handle.local_addr().port(),
            ..test_config()
        };
        let handler = CommandHandler::new(Arc::new(FileStore::in_memory(1)));

        assert!(matches!(
            RequestDispatcher::bind(&config, handler).await,
            Err(ServerError::Bind { .. })
        ));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_uses_storage_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            storage_root: dir.path().to_path_buf(),
            ..test_config()
        };

        let handle = RequestDispatcher::open(&config).await.unwrap().spawn();
        let client = StorageClient::new(handle.local_addr().to_string());
        client.store("kept", Bytes::from("on disk")).await.unwrap();
        handle.shutdown().await;

        let reopened = FileStore::open_dir(dir.path(), 4).unwrap();
        assert_eq!(reopened.retrieve("kept").unwrap(), Bytes::from("on disk"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_queue_holds_acceptor_and_preserves_order() {
        let store = Arc::new(FileStore::in_memory(16));
        let handler = CommandHandler::new(Arc::clone(&store));
        let config = ServerConfig {
            workers: 1,
            queue_capacity: 1,
            ..test_config()
        };
        let handle = RequestDispatcher::bind(&config, handler)
            .await
            .unwrap()
            .spawn();
        let addr = handle.local_addr();

        // Occupy the only worker with a connection that stalls mid-header.
        let header = encode_request(&RequestFrame::store("first", 1)).unwrap();
        let mut blocker = TcpStream::connect(addr).await.unwrap();
        blocker.write_all(&header[..100]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // One waits in the queue, one is held by the acceptor, one stays in the backlog.
        let mut queued = Vec::new();
        for data in [&b"b"[..], b"cc", b"ddd"] {
            queued.push(send_store(addr, "same", data).await);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = Arc::clone(handle.stats());
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 3);
        assert_eq!(stats.requests_processed.load(Ordering::Relaxed), 0);
        assert!(!store.exists("same"));

        blocker.write_all(&header[100..]).await.unwrap();
        blocker.write_all(b"x").await.unwrap();
        assert!(read_reply(&mut blocker).await.success);

        for (stream, size) in queued.iter_mut().zip([1u64, 2, 3]) {
            let reply = read_reply(stream).await;
            assert!(reply.success);
            assert_eq!(reply.data_size, size);
        }

        // Served in accept order, so the last writer wins.
        assert_eq!(store.retrieve("same").unwrap(), Bytes::from("ddd"));
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 4);
        assert_eq!(stats.requests_processed.load(Ordering::Relaxed), 4);

        handle.shutdown().await;
    }
}
