//! Privilege-separated AppleScript broker
//!
//! The broker host owns Automation permission and runs scripts on behalf of
//! the MCP server. The two talk over a Unix socket using the line protocol in
//! [`protocol`]. [`server`] is the host side, [`client`] the caller side.

pub mod client;
pub mod probe;
pub mod protocol;
pub mod registry;
pub mod script;
pub mod server;

pub use client::{
    BrokerApi, BrokerClient, BrokerClientError, BrokerIdentity, BrokerLauncher, BrokerResult,
    LaunchdLauncher,
};
pub use protocol::{BrokerMethod, BrokerRequest, BrokerResponse};
pub use registry::ProcessRegistry;
pub use script::{DEFAULT_INTERPRETER, ScriptError, ScriptExecutor, ScriptOutput};
pub use server::{BrokerError, BrokerServer};
