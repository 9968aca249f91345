//! `macos-mcp-operator-host` – AppleScript broker host
//!
//! Serves broker requests on a Unix socket until SIGINT or SIGTERM.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use macos_mcp_operator::broker::{BrokerServer, DEFAULT_INTERPRETER};
use macos_mcp_operator::config::{ConfigStore, default_config_path};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "macos-mcp-operator-host")]
#[command(about = "Privileged AppleScript broker for macos-mcp-operator", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket path (overrides the configured one)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Script interpreter
    #[arg(long, default_value = DEFAULT_INTERPRETER)]
    interpreter: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let socket = match cli.socket {
        Some(socket) => socket,
        None => {
            let store = ConfigStore::new(cli.config.unwrap_or_else(default_config_path));
            store.load()?.broker.socket_path()
        }
    };

    let server = BrokerServer::new(socket, cli.interpreter);
    let shutdown = CancellationToken::new();

    let mut interrupt = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("SIGINT received"),
            _ = terminate.recv() => info!("SIGTERM received"),
        }
        trigger.cancel();
    });

    server.serve(shutdown).await?;
    info!("broker host stopped");
    Ok(())
}
