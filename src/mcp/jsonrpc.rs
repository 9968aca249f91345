//! JSON-RPC 2.0 envelopes

use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::JsonValue;

/// Parse error
pub const PARSE_ERROR: i64 = -32700;
/// Invalid request
pub const INVALID_REQUEST: i64 = -32600;
/// Method not found
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid params
pub const INVALID_PARAMS: i64 = -32602;
/// Internal error
pub const INTERNAL_ERROR: i64 = -32603;
/// Tool execution failure (server-defined range)
pub const TOOL_EXECUTION_FAILED: i64 = -32000;

/// Request identifier: a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id
    Int(i64),
    /// String id
    String(String),
}

impl RequestId {
    /// Convert a JSON value into an id. Only strings and integral numbers qualify.
    pub fn from_value(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(s) => Some(RequestId::String(s.clone())),
            JsonValue::Number(n) if n.is_finite() && n.fract() == 0.0 => {
                Some(RequestId::Int(*n as i64))
            }
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Int(n) => write!(f, "{n}"),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

/// Inbound request or notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Version tag, expected to be "2.0"
    pub jsonrpc: String,
    /// Identifier; absent for notifications
    pub id: Option<RequestId>,
    /// Method name
    pub method: String,
    /// Optional params
    pub params: Option<JsonValue>,
}

impl Request {
    /// Build a request with an id
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<JsonValue>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Decode a request from a parsed JSON value.
    ///
    /// Returns `None` when the value is not structurally a request: not an
    /// object, missing `jsonrpc`/`method` strings, or carrying an id that is
    /// neither a string nor an integer.
    pub fn from_value(value: &JsonValue) -> Option<Self> {
        let object = value.as_object()?;
        let jsonrpc = object.get("jsonrpc")?.as_str()?.to_string();
        let method = object.get("method")?.as_str()?.to_string();
        let id = match object.get("id") {
            None | Some(JsonValue::Null) => None,
            Some(raw) => Some(RequestId::from_value(raw)?),
        };
        let params = match object.get("params") {
            None | Some(JsonValue::Null) => None,
            Some(raw) => Some(raw.clone()),
        };
        Some(Self {
            jsonrpc,
            id,
            method,
            params,
        })
    }

    /// Whether this is a notification (never answered)
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Error member of a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorObject {
    /// Numeric code
    pub code: i64,
    /// Human-readable message
    pub message: String,
    /// Optional structured detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl ErrorObject {
    /// Error without data
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Outbound response carrying exactly one of result or error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Always "2.0"
    pub jsonrpc: &'static str,
    /// Echoed request id
    pub id: RequestId,
    /// Success payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    /// Failure payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    /// Successful response
    pub fn success(id: RequestId, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response
    pub fn failure(id: RequestId, error: ErrorObject) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Recover an id from a syntactically valid line that failed request decoding.
pub fn extract_id(value: &JsonValue) -> Option<RequestId> {
    value.get("id").and_then(RequestId::from_value)
}
