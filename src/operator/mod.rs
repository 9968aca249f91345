//! Desktop operator: the tool catalog and the executor behind it
//!
//! [`OperatorToolExecutor`] implements [`crate::mcp::ToolExecutor`] over the
//! adapters, broker client, automation queue, safety policy and audit log.
//! [`OperatorRuntime`] wires the production versions of those together.

mod args;
pub mod catalog;
pub mod executor;
pub mod runtime;

pub use catalog::all_tools;
pub use executor::{OperatorAdapters, OperatorDeps, OperatorToolExecutor};
pub use runtime::{OperatorRuntime, server_info, system_adapters, system_deps};
