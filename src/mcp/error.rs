//! Error types for the MCP front end
//!
//! Every failure raised below the session resolves into one of these before a
//! response is written, so each maps onto a fixed JSON-RPC code.

use thiserror::Error;

use super::jsonrpc::{
    ErrorObject, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
    TOOL_EXECUTION_FAILED,
};

/// Error raised by a tool executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// Arguments were rejected before any action ran
    #[error("{0}")]
    InvalidParams(String),

    /// The tool could not be carried out
    #[error("{0}")]
    ExecutionFailed(String),

    /// Unexpected executor failure
    #[error("{0}")]
    Internal(String),
}

impl ToolError {
    /// Invalid-params error
    pub fn invalid_params(message: impl Into<String>) -> Self {
        ToolError::InvalidParams(message.into())
    }

    /// Execution-failure error
    pub fn execution_failed(message: impl Into<String>) -> Self {
        ToolError::ExecutionFailed(message.into())
    }

    /// JSON-RPC code for this error
    pub fn code(&self) -> i64 {
        match self {
            ToolError::InvalidParams(_) => INVALID_PARAMS,
            ToolError::ExecutionFailed(_) => TOOL_EXECUTION_FAILED,
            ToolError::Internal(_) => INTERNAL_ERROR,
        }
    }
}

/// Result alias for tool execution
pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Session-level failure attached to a request id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Line was JSON but not a decodable request
    #[error("{0}")]
    Parse(String),

    /// Request is not acceptable in the current state
    #[error("{0}")]
    InvalidRequest(String),

    /// Unknown method
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Malformed params
    #[error("{0}")]
    InvalidParams(String),

    /// Unexpected failure
    #[error("{0}")]
    Internal(String),

    /// Error surfaced by the tool executor
    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl SessionError {
    /// JSON-RPC code for this error
    pub fn code(&self) -> i64 {
        match self {
            SessionError::Parse(_) => PARSE_ERROR,
            SessionError::InvalidRequest(_) => INVALID_REQUEST,
            SessionError::MethodNotFound(_) => METHOD_NOT_FOUND,
            SessionError::InvalidParams(_) => INVALID_PARAMS,
            SessionError::Internal(_) => INTERNAL_ERROR,
            SessionError::Tool(err) => err.code(),
        }
    }
}

impl From<SessionError> for ErrorObject {
    fn from(err: SessionError) -> Self {
        ErrorObject::new(err.code(), err.to_string())
    }
}
