//! Configuration types for MCP servers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Default per-request deadline in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Top-level MCP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Deadline applied to servers that do not set their own.
    #[serde(default = "default_timeout")]
    pub request_timeout_ms: u64,
    /// Servers to start, keyed by a short name used in qualified tool names.
    #[serde(default)]
    pub servers: BTreeMap<String, McpServerConfig>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            servers: BTreeMap::new(),
        }
    }
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Full launch command, e.g. `npx -y @modelcontextprotocol/server-memory`.
    /// Also the registry key: one session per distinct command.
    pub command: String,
    /// Environment variables to set for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-request deadline in milliseconds. Falls back to the manager's.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl McpServerConfig {
    /// A server with no extra environment and the default deadline.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env: HashMap::new(),
            timeout_ms: None,
        }
    }
}
