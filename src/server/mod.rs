//! Server Module
//!
//! The TCP front end of the storage node: a listening socket, one acceptor
//! task and a fixed pool of workers draining a bounded queue of accepted
//! connections.
//!
//! ## Example
//!
//! ```ignore
//! use flashstore::server::{RequestDispatcher, ServerConfig};
//!
//! let config = ServerConfig::default();
//! let handle = RequestDispatcher::open(&config).await?.spawn();
//!
//! // ... later
//! handle.shutdown().await;
//! ```

pub mod dispatcher;

pub use dispatcher::{
    RequestDispatcher, ServerConfig, ServerError, ServerHandle, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_WORKERS,
};
