//! # hibye-client
//!
//! Client library for hibye.
//!
//! This crate provides:
//! - A one-shot exchange: connect, send one message, read one reply, close
//! - The reply type, exposing both the raw bytes and the text before the first NUL

pub mod client;
pub mod error;

pub use client::{Client, ClientConfig, Reply};
pub use error::ClientError;
