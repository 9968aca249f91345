//! macOS MCP Operator – desktop automation for AI agents over MCP
//!
//! This crate implements:
//! - A line-delimited JSON-RPC (MCP) session with per-request concurrency and cancellation
//! - A declarative tool catalog with recursive argument validation
//! - A single-flight automation queue that serializes access to the shared desktop
//! - A privilege-separated AppleScript broker reached over a Unix socket
//! - Adapters for input, windows, capture, permissions and app launching

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// OS adapter traits and their system implementations
pub mod adapters;

/// Append-only audit trail
pub mod audit;

/// Serialized execution of desktop actions
pub mod automation;

/// AppleScript broker: wire protocol, host server and client
pub mod broker;

/// Persisted configuration
pub mod config;

/// MCP protocol front end
pub mod mcp;

/// Tool catalog, executor and process wiring
pub mod operator;

/// Safety evaluation hook
pub mod safety;

/// Shared domain types
pub mod types;

pub use operator::{OperatorRuntime, OperatorToolExecutor};

/// Current crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name advertised in the MCP initialize result
pub const SERVER_NAME: &str = "macos-mcp-operator";
