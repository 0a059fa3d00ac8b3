//! WebSocket Broadcast Relay
//!
//! `start` runs a server that forwards every text message it receives to all
//! connected clients. `connect` joins a server, sends typed lines and prints
//! whatever the server relays back.

mod client;
mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::RelayConfig;
use server::RelayServer;

/// WebSocket broadcast relay
#[derive(Parser, Debug)]
#[command(name = "ws-relay")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Host to listen on or connect to
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port to listen on or connect to
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Starts the server
    Start,
    /// Connects to the server
    Connect,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = match &args.config {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RelayConfig::default(),
    }
    .with_overrides(args.host, args.port);

    match args.command {
        Command::Start => start(config).await?,
        Command::Connect => client::run(&config.ws_url()).await?,
    }

    Ok(())
}

async fn start(config: RelayConfig) -> anyhow::Result<()> {
    info!("WebSocket relay v{}", env!("CARGO_PKG_VERSION"));

    let server = Arc::new(RelayServer::new(config));
    let server_handle = Arc::clone(&server);

    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => {
                info!("{} received, closing connections", name);
                server_handle.shutdown();
            }
            Err(e) => error!("Cannot listen for termination signals: {}", e),
        }
    });

    server.run().await?;

    info!("Relay stopped");
    Ok(())
}

/// Resolve with the name of the first termination signal delivered
#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    signal::ctrl_c().await.map(|_| "Ctrl+C")
}
