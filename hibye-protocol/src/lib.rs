//! # hibye-protocol
//!
//! Wire format shared by the hibye server and client.
//!
//! This crate provides:
//! - The compile-time endpoint, buffer size and listen backlog
//! - A fixed-capacity, NUL-terminated message buffer
//! - Command classification (`HELLO`, `BYE`, anything else)
//! - Request encoding and reply construction

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{encode_request, text_until_nul};
pub use error::ProtocolError;
pub use message::{Command, MessageBuffer};

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Default address both sides use.
pub const DEFAULT_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default port for the hibye server.
pub const DEFAULT_PORT: u16 = 8888;

/// Size of every message buffer, in bytes. Requests are read and replies are
/// written in units of exactly this many bytes.
pub const BUFFER_SIZE: usize = 256;

/// Pending connections the OS may queue while the server is busy.
pub const LISTEN_BACKLOG: u32 = 5;

/// Request that asks the server for a reply.
pub const HELLO: &[u8] = b"HELLO";

/// Request that stops the server.
pub const BYE: &[u8] = b"BYE";

/// Reply text sent in response to `HELLO`.
pub const HI_REPLY: &[u8] = b"HI\n";

/// Returns the endpoint the server listens on and the client connects to.
pub fn default_endpoint() -> SocketAddr {
    SocketAddr::new(DEFAULT_ADDR, DEFAULT_PORT)
}
