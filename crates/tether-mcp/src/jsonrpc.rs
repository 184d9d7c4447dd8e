//! JSON-RPC 2.0 types for MCP communication.

use crate::error::McpError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC error code for an unsupported method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response, inbound or outbound.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// A successful reply to a server-initiated request.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error reply to a server-initiated request.
    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// The numeric request id this response answers, if it has one.
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_u64()
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// A message read from a provider's stdout.
///
/// Classification depends only on which of `id` and `method` are present.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// `id` without `method`: the answer to one of our requests.
    Response(JsonRpcResponse),
    /// `id` and `method`: the provider is asking us something.
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    /// `method` without `id`.
    Notification {
        method: String,
        params: Option<Value>,
    },
}

impl Inbound {
    /// Parse and classify one line of provider output.
    pub fn parse(line: &str) -> Result<Self, McpError> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| McpError::Parse(format!("{e}: {line}")))?;
        let Value::Object(mut obj) = value else {
            return Err(McpError::Parse(format!("expected a JSON object: {line}")));
        };

        let method = match obj.remove("method") {
            Some(Value::String(m)) => Some(m),
            _ => None,
        };
        let id = obj.remove("id");
        let params = obj.remove("params");

        match (id, method) {
            (Some(id), Some(method)) => Ok(Inbound::Request { id, method, params }),
            (Some(id), None) => Ok(Inbound::Response(JsonRpcResponse {
                jsonrpc: "2.0",
                id,
                result: obj.remove("result"),
                error: obj.remove("error").map(parse_error_object),
            })),
            (None, Some(method)) => Ok(Inbound::Notification { method, params }),
            (None, None) => Err(McpError::Parse(format!(
                "message has neither id nor method: {line}"
            ))),
        }
    }
}

fn parse_error_object(value: Value) -> JsonRpcError {
    serde_json::from_value(value.clone()).unwrap_or_else(|_| JsonRpcError {
        code: 0,
        message: value.to_string(),
        data: None,
    })
}
