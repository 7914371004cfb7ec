//! Server error types.

use std::net::SocketAddr;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("listen: {0}")]
    Listen(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns whether this error prevents the server from starting.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServerError::Bind { .. } | ServerError::Listen(_))
    }
}
