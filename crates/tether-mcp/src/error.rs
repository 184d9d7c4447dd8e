//! Error types for MCP operations.

use thiserror::Error;

/// Errors from MCP provider communication.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("MCP server '{command}' failed to initialize: {message}")]
    Initialization { command: String, message: String },

    #[error("tools/list failed for '{command}': {message}")]
    ToolList { command: String, message: String },

    #[error("Failed to write to MCP server '{command}': {reason}")]
    Write { command: String, reason: String },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("Malformed message from MCP server: {0}")]
    Parse(String),

    #[error("MCP server '{command}' closed before responding")]
    SessionClosed { command: String },

    #[error("MCP request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Wrap a handshake failure, keeping the underlying message.
    pub(crate) fn initialization(command: &str, cause: &McpError) -> Self {
        let message = match cause {
            McpError::Rpc { message, .. } => message.clone(),
            other => other.to_string(),
        };
        McpError::Initialization {
            command: command.to_string(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialization_keeps_rpc_message() {
        let rpc = McpError::Rpc {
            server: "srv".into(),
            code: -32603,
            message: "unsupported protocol".into(),
        };
        match McpError::initialization("srv", &rpc) {
            McpError::Initialization { command, message } => {
                assert_eq!(command, "srv");
                assert_eq!(message, "unsupported protocol");
            }
            other => panic!("Expected Initialization, got: {other:?}"),
        }
    }

    #[test]
    fn initialization_wraps_session_closed() {
        let closed = McpError::SessionClosed {
            command: "srv".into(),
        };
        let err = McpError::initialization("srv", &closed);
        assert!(err.to_string().contains("closed before responding"));
    }
}
