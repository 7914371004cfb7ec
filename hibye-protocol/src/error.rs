//! Protocol error types.

use thiserror::Error;

/// Errors raised while building messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The receiver treats the first NUL as the end of the text, so a message
    /// carrying one earlier would be silently cut short.
    #[error("message contains a NUL byte at position {position}")]
    InteriorNul { position: usize },
}
