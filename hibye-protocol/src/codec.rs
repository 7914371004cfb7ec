//! Request encoding and NUL-terminated text handling.

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};

/// Encodes a request: the message bytes followed by a single NUL.
pub fn encode_request(message: &str) -> Result<BytesMut, ProtocolError> {
    if let Some(position) = message.bytes().position(|b| b == 0) {
        return Err(ProtocolError::InteriorNul { position });
    }

    let mut buf = BytesMut::with_capacity(message.len() + 1);
    buf.put_slice(message.as_bytes());
    buf.put_u8(0);
    Ok(buf)
}

/// Returns the prefix of `bytes` before the first NUL, or all of `bytes` if
/// there is none.
pub fn text_until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}
