//! One provider session: process, correlator, and the handshake.
//!
//! A session moves `Spawned → Initializing → Ready` during [`ServerSession::connect`]
//! and ends as `Stopped` (explicit stop) or `Failed` (handshake failure or
//! unsolicited exit).

use crate::config::McpServerConfig;
use crate::correlator::{Correlator, NotificationSink};
use crate::error::McpError;
use crate::transport::{StdioTransport, TransportEvent};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// MCP protocol version we support.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name reported during initialization.
const CLIENT_NAME: &str = "tether";

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Spawned,
    Initializing,
    Ready,
    Stopped,
    Failed,
}

/// Information about a tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    /// Raw input schema; `Null` when the provider declared none.
    pub input_schema: Value,
}

/// Identity a provider reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    #[serde(default)]
    protocol_version: Option<String>,
    #[serde(default)]
    capabilities: Map<String, Value>,
    #[serde(default)]
    server_info: Option<ServerInfo>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    input_schema: Value,
}

/// A live connection to one provider process.
pub struct ServerSession {
    command: String,
    label: String,
    transport: Arc<StdioTransport>,
    correlator: Arc<Correlator>,
    tools: Vec<McpToolInfo>,
    capabilities: Map<String, Value>,
    server_info: Option<ServerInfo>,
    protocol_version: Option<String>,
    state: Arc<watch::Sender<SessionState>>,
    closed: CancellationToken,
}

impl ServerSession {
    /// Spawn the provider, run `initialize` and `tools/list`, and return a
    /// ready session.
    ///
    /// Spawn failures surface as [`McpError::Spawn`]; anything that goes wrong
    /// afterwards, including the process exiting, as
    /// [`McpError::Initialization`]. A failing `tools/list` is not fatal.
    pub async fn connect(
        label: &str,
        config: &McpServerConfig,
        timeout: Duration,
        notifications: NotificationSink,
    ) -> Result<Self, McpError> {
        let command = config.command.as_str();
        let (transport, events) = StdioTransport::launch(command, &config.env)?;
        let transport = Arc::new(transport);
        let correlator = Arc::new(Correlator::new(
            Arc::clone(&transport),
            timeout,
            notifications,
        ));
        let (state, _) = watch::channel(SessionState::Spawned);
        let state = Arc::new(state);
        let closed = CancellationToken::new();

        tokio::spawn(dispatch(
            events,
            Arc::clone(&correlator),
            Arc::clone(&state),
            closed.clone(),
            command.to_string(),
        ));

        state.send_replace(SessionState::Initializing);
        let (init, tools) = match handshake(&correlator, command).await {
            Ok(done) => done,
            Err(e) => {
                state.send_replace(SessionState::Failed);
                transport.kill();
                return Err(McpError::initialization(command, &e));
            }
        };

        state.send_if_modified(|s| {
            if *s == SessionState::Initializing {
                *s = SessionState::Ready;
                true
            } else {
                false
            }
        });

        tracing::info!(
            server = %command,
            tool_count = tools.len(),
            "MCP server connected"
        );

        Ok(Self {
            command: command.to_string(),
            label: label.to_string(),
            transport,
            correlator,
            tools,
            capabilities: init.capabilities,
            server_info: init.server_info,
            protocol_version: init.protocol_version,
            state,
            closed,
        })
    }

    /// Call a tool on this server and return the raw result.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value, McpError> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });
        self.correlator.send("tools/call", Some(params)).await
    }

    /// Terminate the provider. Does not wait for it to exit.
    pub fn stop(&self) {
        self.state.send_if_modified(|s| {
            if *s == SessionState::Failed || *s == SessionState::Stopped {
                false
            } else {
                *s = SessionState::Stopped;
                true
            }
        });
        self.transport.kill();
        tracing::info!(server = %self.command, "MCP server stopped");
    }

    /// Resolves once the provider process is gone and every in-flight request
    /// has been rejected.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// The launch command; also this session's registry key.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Short name used when namespacing tool names.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn tools(&self) -> &[McpToolInfo] {
        &self.tools
    }

    /// Capabilities the provider declared during initialization.
    pub fn capabilities(&self) -> &Map<String, Value> {
        &self.capabilities
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }
}

async fn handshake(
    correlator: &Correlator,
    command: &str,
) -> Result<(InitializeResult, Vec<McpToolInfo>), McpError> {
    let init_params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    });

    let result = correlator.send("initialize", Some(init_params)).await?;
    let init = parse_initialize_result(result, command);

    correlator
        .notify("notifications/initialized", None)
        .await?;

    let tools = list_tools(correlator, command).await?;
    Ok((init, tools))
}

/// Fetch the tool list. Only a lost process is fatal; any other failure is
/// logged and leaves the session with no tools.
async fn list_tools(correlator: &Correlator, command: &str) -> Result<Vec<McpToolInfo>, McpError> {
    let result = match correlator
        .send("tools/list", Some(serde_json::json!({})))
        .await
    {
        Ok(result) => result,
        Err(e @ (McpError::SessionClosed { .. } | McpError::Write { .. })) => return Err(e),
        Err(e) => {
            let err = McpError::ToolList {
                command: command.to_string(),
                message: e.to_string(),
            };
            tracing::warn!(server = %command, "{err}");
            return Ok(Vec::new());
        }
    };
    Ok(parse_tools(&result, command))
}

fn parse_initialize_result(result: Value, command: &str) -> InitializeResult {
    serde_json::from_value(result).unwrap_or_else(|e| {
        tracing::warn!(server = %command, "Unexpected initialize result: {e}");
        InitializeResult::default()
    })
}

/// Read the `tools` array of a tools/list result. A missing array means no
/// tools; malformed entries are skipped.
fn parse_tools(result: &Value, command: &str) -> Vec<McpToolInfo> {
    let Some(entries) = result.get("tools").and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match ToolEntry::deserialize(entry) {
            Ok(t) => Some(McpToolInfo {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            }),
            Err(e) => {
                tracing::warn!(server = %command, "Skipping malformed tool entry: {e}");
                None
            }
        })
        .collect()
}

/// The session's single event-handling flow: every stdout line is handled
/// here in order, and process exit closes the correlator.
async fn dispatch(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    correlator: Arc<Correlator>,
    state: Arc<watch::Sender<SessionState>>,
    closed: CancellationToken,
    command: String,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Line(line) => correlator.on_line(&line).await,
            TransportEvent::Exited(status) => {
                if *state.borrow() != SessionState::Stopped {
                    tracing::warn!(server = %command, ?status, "MCP server exited");
                }
                break;
            }
        }
    }

    correlator.close().await;
    state.send_if_modified(|s| match s {
        SessionState::Stopped | SessionState::Failed => false,
        _ => {
            *s = SessionState::Failed;
            true
        }
    });
    closed.cancel();
}
