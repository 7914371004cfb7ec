//! hibye-cli - Command-line client for hibye
//!
//! Sends exactly one message to the server and prints the reply.

use clap::Parser;
use colored::Colorize;
use hibye_client::{Client, ClientConfig};
use hibye_protocol::default_endpoint;
use std::io::Write;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hibye-cli")]
#[command(about = "Send one message to a hibye server and print the reply")]
#[command(version)]
struct Cli {
    /// Server address
    #[arg(short, long, env = "HIBYE_SERVER", default_value_t = default_endpoint())]
    server: SocketAddr,

    /// Message to send (HELLO gets a reply, BYE stops the server)
    #[arg(allow_hyphen_values = true)]
    message: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Exits with usage on stderr if the message is missing
    let cli = Cli::parse();

    let client = Client::new(ClientConfig::new(cli.server));
    let reply = match client.send(&cli.message).await {
        Ok(reply) => reply,
        Err(e) => {
            eprintln!("{}: {}", "Connection failed".red(), e);
            std::process::exit(1);
        }
    };

    let mut out = std::io::stdout().lock();
    write!(out, "{}", reply.text())?;
    out.flush()?;

    Ok(())
}
