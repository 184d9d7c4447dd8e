//! MCP manager: the registry of live provider sessions.
//!
//! Sessions are keyed by launch command; at most one session exists per
//! distinct command. A session whose process exits is removed from the
//! registry by a background supervisor.

use crate::config::{DEFAULT_TIMEOUT_MS, McpConfig, McpServerConfig};
use crate::correlator::{NotificationSink, ServerNotification};
use crate::error::McpError;
use crate::session::ServerSession;
use crate::tool::{McpTool, qualified_name, server_label};
use futures_util::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

/// How long `stop_all_servers` waits for each process to go away.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type Registry = Arc<Mutex<BTreeMap<String, Arc<ServerSession>>>>;

/// Settings applied to every session the manager starts.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Per-request deadline for servers that do not set their own.
    pub request_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Manages connections to multiple MCP servers.
pub struct McpManager {
    sessions: Registry,
    options: ManagerOptions,
    notifications: NotificationSink,
}

impl McpManager {
    pub fn new(options: ManagerOptions) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(BTreeMap::new())),
            options,
            notifications: NotificationSink::new(),
        }
    }

    /// Take the stream of provider notifications from every session,
    /// including ones already running. Only the first call returns it;
    /// notifications that arrive before then are not kept.
    pub fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<ServerNotification>> {
        self.notifications.subscribe()
    }

    /// Start a server by launch command. Does nothing if a session for this
    /// exact command already exists.
    pub async fn start_server(&self, command: &str) -> Result<(), McpError> {
        self.start_with_config(None, &McpServerConfig::new(command))
            .await
    }

    /// Start a server with its own environment and deadline. `name`, when
    /// given, labels its tools instead of the command.
    pub async fn start_with_config(
        &self,
        name: Option<&str>,
        config: &McpServerConfig,
    ) -> Result<(), McpError> {
        if self.sessions.lock().await.contains_key(&config.command) {
            tracing::debug!(server = %config.command, "MCP server already running");
            return Ok(());
        }

        let label = server_label(name.unwrap_or(&config.command));
        let timeout = config
            .timeout_ms
            .map_or(self.options.request_timeout, Duration::from_millis);
        let session = ServerSession::connect(
            &label,
            config,
            timeout,
            self.notifications.clone(),
        )
        .await?;
        let session = Arc::new(session);

        {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(&config.command) {
                // Lost a race with a concurrent start of the same command.
                drop(sessions);
                session.stop();
                return Ok(());
            }
            sessions.insert(config.command.clone(), Arc::clone(&session));
        }

        self.supervise(session);
        Ok(())
    }

    /// Start every configured server. Servers that fail are logged and
    /// skipped; the failures are returned keyed by configured name.
    pub async fn start_configured(&self, config: &McpConfig) -> Vec<(String, McpError)> {
        let starts = config.servers.iter().map(|(name, server)| async move {
            let mut server = server.clone();
            server.timeout_ms = server.timeout_ms.or(Some(config.request_timeout_ms));
            (name, self.start_with_config(Some(name), &server).await)
        });

        let mut failures = Vec::new();
        for (name, result) in join_all(starts).await {
            if let Err(e) = result {
                tracing::warn!("Failed to start MCP server '{}': {}", name, e);
                failures.push((name.clone(), e));
            }
        }
        failures
    }

    /// Stop a server. Does nothing if it is not running.
    pub async fn stop_server(&self, command: &str) {
        let removed = self.sessions.lock().await.remove(command);
        if let Some(session) = removed {
            session.stop();
        }
    }

    /// Stop every server in parallel and wait briefly for each to exit.
    pub async fn stop_all_servers(&self) {
        let sessions: Vec<_> = std::mem::take(&mut *self.sessions.lock().await)
            .into_values()
            .collect();

        join_all(sessions.iter().map(|session| async move {
            session.stop();
            if tokio::time::timeout(SHUTDOWN_GRACE, session.closed())
                .await
                .is_err()
            {
                tracing::warn!(server = %session.command(), "MCP server did not exit in time");
            }
        }))
        .await;
    }

    /// Launch commands of all registered sessions, sorted.
    pub async fn get_active_servers(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// The session for a launch command, if registered.
    pub async fn session(&self, command: &str) -> Option<Arc<ServerSession>> {
        self.sessions.lock().await.get(command).cloned()
    }

    /// Every tool of every registered session, with catalog-unique names.
    ///
    /// Names that would still collide get a numeric suffix, assigned in
    /// sorted command order.
    pub async fn get_all_tools(&self) -> Vec<McpTool> {
        let sessions: Vec<_> = self.sessions.lock().await.values().cloned().collect();

        let mut seen = HashSet::new();
        let mut tools = Vec::new();
        for session in sessions {
            for info in session.tools() {
                let base = qualified_name(session.label(), &info.name);
                let mut name = base.clone();
                let mut n = 2;
                while !seen.insert(name.clone()) {
                    name = format!("{base}_{n}");
                    n += 1;
                }
                tools.push(McpTool::new(name, info.clone(), Arc::clone(&session)));
            }
        }
        tools
    }

    /// Remove the registry entry once the session's process is gone, unless
    /// the command has since been restarted.
    fn supervise(&self, session: Arc<ServerSession>) {
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            session.closed().await;
            let mut sessions = sessions.lock().await;
            let current = sessions
                .get(session.command())
                .is_some_and(|s| Arc::ptr_eq(s, &session));
            if current {
                sessions.remove(session.command());
                tracing::info!(server = %session.command(), "Removed exited MCP server");
            }
        });
    }
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new(ManagerOptions::default())
    }
}

impl Drop for McpManager {
    fn drop(&mut self) {
        if let Ok(sessions) = self.sessions.try_lock() {
            for session in sessions.values() {
                session.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_manager_is_empty() {
        let manager = McpManager::default();
        assert!(manager.get_active_servers().await.is_empty());
        assert!(manager.get_all_tools().await.is_empty());
        manager.stop_all_servers().await;
    }

    #[tokio::test]
    async fn stop_absent_server_is_noop() {
        let manager = McpManager::default();
        manager.stop_server("never-started").await;
        assert!(manager.get_active_servers().await.is_empty());
    }

    #[tokio::test]
    async fn failed_server_is_not_registered() {
        let manager = McpManager::default();
        let result = manager.start_server("nonexistent_command_xyz123").await;
        assert!(matches!(result, Err(McpError::Spawn { .. })));
        assert!(manager.get_active_servers().await.is_empty());
    }

    #[tokio::test]
    async fn configured_failures_are_reported_and_skipped() {
        let mut config = McpConfig::default();
        config.servers.insert(
            "bad".to_string(),
            McpServerConfig::new("nonexistent_command_xyz123"),
        );
        config
            .servers
            .insert("quits".to_string(), McpServerConfig::new("true"));

        let manager = McpManager::default();
        let failures = manager.start_configured(&config).await;
        let names: Vec<&str> = failures.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["bad", "quits"]);
        assert!(matches!(failures[1].1, McpError::Initialization { .. }));
        assert!(manager.get_active_servers().await.is_empty());
    }

    #[test]
    fn notifications_can_be_taken_once() {
        let manager = McpManager::default();
        assert!(manager.take_notifications().is_some());
        assert!(manager.take_notifications().is_none());
    }
}
