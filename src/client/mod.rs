//! Wire Client
//!
//! A small async client for the storage node. Every call opens its own
//! connection, sends one request and reads one reply, matching the server's
//! one-request-per-connection model.
//!
//! ```ignore
//! use flashstore::client::StorageClient;
//! use bytes::Bytes;
//!
//! let client = StorageClient::new("127.0.0.1:9000");
//! client.store("notes.txt", Bytes::from("hello")).await?;
//! let data = client.retrieve("notes.txt").await?;
//! ```

use crate::protocol::{
    decode_response, encode_request, Operation, ProtocolError, RequestFrame, ResponseFrame,
    RESPONSE_FRAME_LEN,
};
use bytes::Bytes;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

/// Errors returned by [`StorageClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The request could not be encoded or the reply could not be decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered with `success = false`
    #[error("server error: {0}")]
    Server(String),

    /// The reply was well-formed but inconsistent
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Client for a single storage node.
#[derive(Debug, Clone)]
pub struct StorageClient {
    addr: String,
}

impl StorageClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Address of the server this client talks to
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Stores `data` under `filename`, returning the stored size.
    pub async fn store(&self, filename: &str, data: Bytes) -> Result<u64, ClientError> {
        let frame = RequestFrame::store(filename, data.len() as u64);
        let (header, _) = self.call(&frame, &data).await?;
        Ok(header.data_size)
    }

    /// Fetches the contents of `filename`.
    pub async fn retrieve(&self, filename: &str) -> Result<Bytes, ClientError> {
        let (_, body) = self.call(&RequestFrame::retrieve(filename), &[]).await?;
        Ok(body)
    }

    pub async fn delete(&self, filename: &str) -> Result<(), ClientError> {
        self.call(&RequestFrame::delete(filename), &[]).await?;
        Ok(())
    }

    /// Returns the server's listing, one `name (size bytes)` line per file.
    pub async fn list(&self) -> Result<String, ClientError> {
        let (_, body) = self.call(&RequestFrame::list(), &[]).await?;
        String::from_utf8(body.to_vec())
            .map_err(|e| ClientError::InvalidResponse(format!("listing is not UTF-8: {}", e)))
    }

    async fn call(
        &self,
        frame: &RequestFrame,
        payload: &[u8],
    ) -> Result<(ResponseFrame, Bytes), ClientError> {
        // Encode first so an unencodable request never opens a connection.
        let header = encode_request(frame)?;

        let mut stream = TcpStream::connect(self.addr.as_str()).await?;
        stream.write_all(&header).await?;
        if !payload.is_empty() {
            stream.write_all(payload).await?;
        }
        stream.flush().await?;
        trace!(
            server = %self.addr,
            operation = %frame.operation,
            bytes = header.len() + payload.len(),
            "Sent request"
        );

        let mut buf = [0u8; RESPONSE_FRAME_LEN];
        stream.read_exact(&mut buf).await?;
        let response = decode_response(&buf)?;

        if !response.success {
            return Err(ClientError::Server(response.message));
        }

        let body = match frame.operation {
            Operation::Retrieve | Operation::List => {
                read_body(&mut stream, response.data_size).await?
            }
            Operation::Store | Operation::Delete => Bytes::new(),
        };

        Ok((response, body))
    }
}

async fn read_body(stream: &mut TcpStream, size: u64) -> Result<Bytes, ClientError> {
    let mut body = Vec::new();
    stream.take(size).read_to_end(&mut body).await?;

    if (body.len() as u64) < size {
        return Err(ClientError::InvalidResponse(format!(
            "expected {} payload bytes, received {}",
            size,
            body.len()
        )));
    }

    Ok(Bytes::from(body))
}
