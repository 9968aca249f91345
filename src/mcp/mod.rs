//! MCP front end
//!
//! Line-delimited JSON-RPC transport, the dynamic [`JsonValue`] model, tool
//! input schemas and the [`McpServer`] session that ties them together.

pub mod error;
pub mod jsonrpc;
pub mod schema;
pub mod session;
pub mod tooling;
pub mod value;
pub mod versioning;

pub use error::{SessionError, ToolError, ToolResult};
pub use jsonrpc::{ErrorObject, Request, RequestId, Response};
pub use schema::{SchemaProperty, SchemaType, ToolSchema};
pub use session::{LineWriter, McpServer, ResponseWriter, ServerInfo};
pub use tooling::{ImageDeliveryMode, ToolCallResult, ToolDefinition, ToolExecutor, ToolImage};
pub use value::JsonValue;
