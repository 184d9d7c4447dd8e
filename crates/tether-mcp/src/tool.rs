//! McpTool: wraps an MCP server tool as a tether_types::Tool.

use crate::error::McpError;
use crate::session::{McpToolInfo, ServerSession};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tether_types::{Schema, ToolError};

/// Prefix shared by every qualified MCP tool name.
pub const NAMESPACE_PREFIX: &str = "mcp__";

/// A tool backed by an MCP server.
///
/// The qualified name follows the pattern `mcp__<server>__<tool>` so that
/// identically named tools from different providers do not collide.
pub struct McpTool {
    qualified_name: String,
    tool_info: McpToolInfo,
    parameters: Schema,
    session: Arc<ServerSession>,
}

impl McpTool {
    /// Wrap a discovered tool, translating its input schema once.
    pub fn new(qualified_name: String, tool_info: McpToolInfo, session: Arc<ServerSession>) -> Self {
        let parameters = Schema::from_json(&tool_info.input_schema);
        Self {
            qualified_name,
            tool_info,
            parameters,
            session,
        }
    }

    /// The tool's name as the provider knows it.
    pub fn original_name(&self) -> &str {
        &self.tool_info.name
    }

    /// Launch command of the owning session.
    pub fn server(&self) -> &str {
        self.session.command()
    }

    /// Forward `tools/call` to the owning session and render the result.
    ///
    /// Arguments are not validated here.
    pub async fn call(&self, arguments: Value) -> Result<String, McpError> {
        let result = self
            .session
            .call_tool(&self.tool_info.name, arguments)
            .await?;
        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            tracing::warn!(
                server = %self.server(),
                tool = %self.tool_info.name,
                "MCP tool reported an error"
            );
        }
        Ok(render_result(&result))
    }
}

impl tether_types::Tool for McpTool {
    fn name(&self) -> &str {
        &self.qualified_name
    }

    fn description(&self) -> &str {
        &self.tool_info.description
    }

    fn parameters(&self) -> &Schema {
        &self.parameters
    }

    fn invoke(
        &self,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + '_>> {
        Box::pin(async move {
            self.call(input).await.map_err(|e| match e {
                McpError::Rpc { message, .. } => ToolError::ExecutionFailed(message),
                other => ToolError::ExecutionFailed(other.to_string()),
            })
        })
    }
}

/// Turn a `tools/call` result into text.
///
/// With a `content` array, the text of every `text` block is joined with
/// newlines and other block types are ignored. Anything else is returned as
/// its JSON encoding.
pub fn render_result(result: &Value) -> String {
    match result.get("content").and_then(Value::as_array) {
        Some(blocks) => blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        None => result.to_string(),
    }
}

/// Build a qualified tool name.
pub fn qualified_name(server_label: &str, tool_name: &str) -> String {
    format!("{NAMESPACE_PREFIX}{server_label}__{tool_name}")
}

/// Derive a name-safe server label from a launch command or configured name.
///
/// Characters outside `[A-Za-z0-9-]` become `_`, with runs collapsed, so a
/// label never contains the `__` separator.
pub fn server_label(source: &str) -> String {
    let mut label = String::with_capacity(source.len());
    for c in source.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            label.push(c);
        } else if !label.ends_with('_') {
            label.push('_');
        }
    }
    let trimmed = label.trim_matches('_');
    if trimmed.is_empty() {
        "server".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_joins_text_blocks() {
        let result = json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "image", "data": "base64data", "mimeType": "image/png"},
                {"type": "text", "text": "second"}
            ]
        });
        assert_eq!(render_result(&result), "first\nsecond");
    }

    #[test]
    fn render_without_text_blocks_is_empty() {
        let result = json!({"content": [{"type": "image", "data": "x", "mimeType": "image/png"}]});
        assert_eq!(render_result(&result), "");
    }

    #[test]
    fn render_without_content_is_json() {
        let result = json!({"answer": 42});
        assert_eq!(render_result(&result), r#"{"answer":42}"#);
        assert_eq!(render_result(&Value::Null), "null");
    }

    #[test]
    fn qualified_name_format() {
        assert_eq!(
            qualified_name("filesystem", "read_file"),
            "mcp__filesystem__read_file"
        );
    }

    #[test]
    fn server_label_is_name_safe() {
        assert_eq!(server_label("filesystem"), "filesystem");
        assert_eq!(
            server_label("npx -y @modelcontextprotocol/server-memory"),
            "npx_-y_modelcontextprotocol_server-memory"
        );
        assert_eq!(server_label("python3 my__server.py"), "python3_my_server_py");
        assert_eq!(server_label("///"), "server");
    }

    #[test]
    fn mcp_tool_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<McpTool>();
    }
}
