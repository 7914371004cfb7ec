//! # hibye-server
//!
//! TCP server for hibye.
//!
//! This crate provides:
//! - Socket setup with an explicit listen backlog
//! - A serial accept loop serving one connection at a time
//! - `HELLO` replies and `BYE` termination
//! - YAML and environment configuration

pub mod config;
pub mod error;
pub mod server;

pub use config::{Config, ConfigError, NetworkConfig};
pub use error::ServerError;
pub use server::{Server, ServerConfig, ServerStats, StopReason};
