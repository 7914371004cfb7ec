//! Message buffer and command types.

use crate::codec::text_until_nul;
use crate::{BUFFER_SIZE, BYE, HELLO, HI_REPLY};
use std::borrow::Cow;
use std::fmt;

/// A fixed-capacity byte buffer holding one NUL-terminated message.
///
/// The same layout is used in both directions: the server reads a request
/// into one, and a reply is always transmitted as a whole buffer, of which
/// only the text before the first NUL is meaningful.
#[derive(Clone, PartialEq, Eq)]
pub struct MessageBuffer {
    bytes: [u8; BUFFER_SIZE],
}

impl MessageBuffer {
    /// Creates a zero-filled buffer.
    pub fn new() -> Self {
        Self {
            bytes: [0u8; BUFFER_SIZE],
        }
    }

    /// Creates a zero-filled buffer whose prefix is `text`.
    ///
    /// Text longer than `BUFFER_SIZE - 1` is truncated so that the final byte
    /// is always NUL.
    pub fn with_text(text: &[u8]) -> Self {
        let mut buffer = Self::new();
        let len = text.len().min(BUFFER_SIZE - 1);
        buffer.bytes[..len].copy_from_slice(&text[..len]);
        buffer
    }

    /// Returns the full buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the full buffer for reading into.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Forces the final byte to NUL.
    pub fn terminate(&mut self) {
        self.bytes[BUFFER_SIZE - 1] = 0;
    }

    /// Returns the bytes before the first NUL.
    pub fn text_bytes(&self) -> &[u8] {
        text_until_nul(&self.bytes)
    }

    /// Returns the text before the first NUL, lossily decoded.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.text_bytes())
    }

    /// Classifies the text held by this buffer.
    pub fn command(&self) -> Command {
        Command::classify(self.text_bytes())
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("text", &self.text())
            .field("capacity", &BUFFER_SIZE)
            .finish()
    }
}

/// What the server does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Exactly `HELLO`: reply with `HI\n`.
    Hello,
    /// Exactly `BYE`: stop the server.
    Bye,
    /// Anything else: print it, send nothing.
    Other,
}

impl Command {
    /// Classifies request text by exact byte equality.
    pub fn classify(text: &[u8]) -> Self {
        if text == HELLO {
            Command::Hello
        } else if text == BYE {
            Command::Bye
        } else {
            Command::Other
        }
    }

    /// Returns the reply buffer for this command, if it gets one.
    pub fn reply(&self) -> Option<MessageBuffer> {
        match self {
            Command::Hello => Some(MessageBuffer::with_text(HI_REPLY)),
            Command::Bye | Command::Other => None,
        }
    }

    /// Returns whether the server stops after serving this command.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Command::Bye)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Hello => write!(f, "HELLO"),
            Command::Bye => write!(f, "BYE"),
            Command::Other => write!(f, "OTHER"),
        }
    }
}
