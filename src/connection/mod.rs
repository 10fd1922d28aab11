//! Connection Handler Module
//!
//! This module serves individual client connections. A worker from the
//! dispatcher's pool takes an accepted connection off the queue and runs a
//! [`ConnectionHandler`] for it. The connection carries exactly one request.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  RequestDispatcher                          │
//! │         (acceptor task + bounded connection queue)          │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ recv()
//!                        ▼
//!           ┌────────────────────────┐
//!           │      Worker task       │
//!           └────────────┬───────────┘
//!                        │
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read header │───>│ Read payload│───>│ Execute cmd │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Send reply  │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Exact Framing**: fixed-size headers, payloads read to the declared size
//! - **Deadlines**: every read and write phase is bounded by `io_timeout`
//! - **Payload Limit**: oversized STORE requests are refused before reading
//! - **Statistics**: tracks connection and request metrics
//!
//! ## Example
//!
//! ```ignore
//! use flashstore::connection::{handle_connection, ConnectionLimits, ConnectionStats};
//! use flashstore::commands::CommandHandler;
//! use flashstore::storage::FileStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(FileStore::in_memory(1000));
//! let stats = Arc::new(ConnectionStats::new());
//! let handler = CommandHandler::new(store);
//!
//! let (stream, addr) = listener.accept().await?;
//! handle_connection(stream, addr, handler, stats, ConnectionLimits::default()).await;
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionLimits, ConnectionStats,
    DEFAULT_IO_TIMEOUT, DEFAULT_MAX_PAYLOAD_SIZE,
};
