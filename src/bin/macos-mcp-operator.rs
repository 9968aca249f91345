//! `macos-mcp-operator` – MCP desktop-automation server on stdio.
//!
//! stdout carries the protocol stream, so all logging goes to stderr.

use std::env;
use std::path::PathBuf;

use anyhow::{Result, bail};
use macos_mcp_operator::OperatorRuntime;
use macos_mcp_operator::mcp::jsonrpc::INTERNAL_ERROR;
use macos_mcp_operator::mcp::{ErrorObject, RequestId, Response};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn print_usage() {
    eprintln!("Usage: macos-mcp-operator [--config PATH]");
}

fn parse_args() -> Result<Option<Option<PathBuf>>> {
    let mut args = env::args().skip(1);
    let mut config = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => match args.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => {
                    print_usage();
                    bail!("--config requires a path argument");
                }
            },
            "--help" | "-h" => {
                print_usage();
                return Ok(None);
            }
            other => {
                print_usage();
                bail!("Unknown argument: {other}");
            }
        }
    }

    Ok(Some(config))
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Report a startup failure the way a client can parse it, then exit.
fn fail_startup(err: &anyhow::Error) -> ! {
    error!(error = %format!("{err:#}"), "startup failed");
    let response = Response::failure(
        RequestId::String("startup".into()),
        ErrorObject::new(INTERNAL_ERROR, format!("Startup failed: {err:#}")),
    );
    if let Ok(line) = serde_json::to_string(&response) {
        println!("{line}");
    }
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = match parse_args() {
        Ok(Some(path)) => path,
        Ok(None) => return Ok(()),
        Err(err) => fail_startup(&err),
    };

    let runtime = match OperatorRuntime::load(config_path) {
        Ok(runtime) => runtime,
        Err(err) => fail_startup(&err),
    };

    tokio::select! {
        served = runtime.serve_stdio() => {
            served?;
            info!("stdin closed, exiting");
        }
        _ = stop_on_interrupt(&runtime) => {}
    }

    Ok(())
}

/// Ctrl-C stops queued and running actions; the session keeps serving.
async fn stop_on_interrupt(runtime: &OperatorRuntime) {
    loop {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        let cancelled = runtime.stop_all();
        warn!(cancelled, "interrupt received, automation stopped");
    }
}
