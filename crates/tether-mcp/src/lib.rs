//! MCP (Model Context Protocol) client implementation for Tether.
//!
//! Providers are stdio processes speaking newline-delimited JSON-RPC 2.0.
//! Each one is spawned, initialized with a handshake, and its tools are
//! discovered; the [`McpManager`] keeps the sessions and flattens their tools
//! into one namespaced catalog of [`McpTool`]s.

pub mod config;
pub mod correlator;
pub mod error;
pub mod jsonrpc;
pub mod manager;
pub mod session;
pub mod tool;
pub mod transport;

pub use config::{McpConfig, McpServerConfig};
pub use correlator::{NotificationSink, ServerNotification};
pub use error::McpError;
pub use manager::{ManagerOptions, McpManager};
pub use session::{McpToolInfo, ServerInfo, ServerSession, SessionState};
pub use tool::McpTool;
