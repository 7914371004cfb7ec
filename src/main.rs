//! hibye - HELLO/BYE TCP server
//!
//! Serves one connection at a time, replies `HI` to `HELLO` and exits on `BYE`.

use hibye_server::config::CONFIG_ENV;
use hibye_server::{Config, Server, ServerConfig, StopReason};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries only received messages
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var(CONFIG_ENV) {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting hibye server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Listen backlog: {}", config.network.backlog);

    let server = match Server::bind(ServerConfig::from(&config.network)).await {
        Ok(server) => Arc::new(server),
        Err(e) => {
            tracing::error!("{}", e);
            return Err(e.into());
        }
    };

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, stopping server...");
            shutdown_server.shutdown();
        }
    });

    match server.run().await? {
        StopReason::Bye => tracing::info!("Server stopped by client"),
        StopReason::Shutdown => tracing::info!("Server stopped"),
    }

    Ok(())
}
