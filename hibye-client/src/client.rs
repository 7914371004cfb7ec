//! One-shot client API.

use crate::error::ClientError;
use bytes::Bytes;
use hibye_protocol::{default_endpoint, encode_request, text_until_nul, BUFFER_SIZE};
use std::borrow::Cow;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address.
    pub addr: SocketAddr,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: default_endpoint(),
        }
    }
}

impl ClientConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

/// The bytes returned by a single read of the server's response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    bytes: Bytes,
}

impl Reply {
    fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(bytes),
        }
    }

    /// Returns exactly the bytes that were read.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the reply text before the first NUL, lossily decoded.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(text_until_nul(&self.bytes))
    }

    /// Returns whether the server closed the connection without replying.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Client for hibye.
///
/// Each [`send`](Client::send) opens its own connection, performs exactly one
/// write and one read, then closes it.
#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Returns the configured server address.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// Sends `message` (plus its NUL terminator) and returns the reply.
    ///
    /// The reply is whatever a single read of up to `BUFFER_SIZE` bytes
    /// returns; it is empty when the server closes without answering.
    pub async fn send(&self, message: &str) -> Result<Reply, ClientError> {
        let request = encode_request(message)?;

        let addr = self.config.addr;
        tracing::debug!("Connecting to {}...", addr);
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;

        stream.write_all(&request).await?;
        tracing::debug!("Sent {} bytes", request.len());

        let mut buf = [0u8; BUFFER_SIZE];
        let n = match stream.read(&mut buf).await {
            Ok(n) => n,
            // The server closed with part of our request unread
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                tracing::debug!("Connection reset while reading reply");
                0
            }
            Err(e) => return Err(ClientError::Io(e)),
        };
        tracing::debug!("Read {} bytes", n);

        Ok(Reply::new(&buf[..n]))
    }
}
