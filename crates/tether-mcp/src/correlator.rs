//! Request/response correlation for one provider session.
//!
//! Requests are multiplexed over a single stdin stream and matched to
//! responses purely by numeric id; responses may arrive in any order.

use crate::error::McpError;
use crate::jsonrpc::{
    Inbound, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND,
};
use crate::transport::StdioTransport;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};

type Reply = Result<Value, McpError>;

/// A notification pushed by a provider.
#[derive(Debug, Clone)]
pub struct ServerNotification {
    /// Launch command of the session that sent it.
    pub server: String,
    pub method: String,
    pub params: Option<Value>,
}

/// Where provider notifications go once a host subscribes.
///
/// Until then notifications are logged and dropped, so nothing accumulates
/// for a host that never listens. Clones share the same subscription.
#[derive(Clone, Default)]
pub struct NotificationSink(Arc<OnceLock<mpsc::UnboundedSender<ServerNotification>>>);

impl NotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the receiving end. Only the first call returns it.
    pub fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<ServerNotification>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.0.set(tx).ok().map(|()| rx)
    }

    /// Hand a notification to the subscriber. Returns `false` when there is
    /// none, or it has gone away.
    fn deliver(&self, notification: ServerNotification) -> bool {
        self.0
            .get()
            .is_some_and(|tx| tx.send(notification).is_ok())
    }
}

/// Tracks outstanding requests for one session.
pub struct Correlator {
    transport: Arc<StdioTransport>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    closed: AtomicBool,
    timeout: Duration,
    timeout_ms: u64,
    notifications: NotificationSink,
}

impl Correlator {
    pub fn new(
        transport: Arc<StdioTransport>,
        timeout: Duration,
        notifications: NotificationSink,
    ) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            timeout,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            notifications,
        }
    }

    /// Take the next request id. Ids start at 1 and are never reused.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a request and wait for the response carrying the same id.
    ///
    /// The deadline covers queueing the request as well as the wait for its
    /// response.
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id();
        let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        let rx = self.register(id).await?;

        let exchange = async {
            if let Err(e) = self.transport.write(&line).await {
                return Err(e);
            }
            tracing::debug!(server = %self.server(), id, method, "sent MCP request");
            match rx.await {
                Ok(reply) => reply,
                Err(_) => Err(self.session_closed()),
            }
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                self.pending.lock().await.remove(&id);
                Err(e)
            }
            Err(_) => {
                // A late response now hits an unknown id and is dropped.
                self.pending.lock().await.remove(&id);
                Err(self.timed_out(method))
            }
        }
    }

    /// Send a notification; nothing is awaited beyond queueing it.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.session_closed());
        }
        let line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        tokio::time::timeout(self.timeout, self.transport.write(&line))
            .await
            .map_err(|_| self.timed_out(method))?
    }

    /// Handle one line of provider output. Never fails: anything unusable is
    /// logged and dropped.
    pub async fn on_line(&self, line: &str) {
        let message = match Inbound::parse(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(server = %self.server(), "Dropping inbound line: {e}");
                return;
            }
        };

        match message {
            Inbound::Response(resp) => self.resolve(resp).await,
            Inbound::Request { id, method, .. } => self.answer(id, &method),
            Inbound::Notification { method, params } => {
                tracing::debug!(server = %self.server(), method = %method, "MCP notification");
                let delivered = self.notifications.deliver(ServerNotification {
                    server: self.server().to_string(),
                    method,
                    params,
                });
                if !delivered {
                    tracing::trace!(server = %self.server(), "no notification subscriber");
                }
            }
        }
    }

    /// Reject every outstanding request with `SessionClosed` and refuse new
    /// ones.
    pub async fn close(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            pending.drain().collect()
        };
        if !drained.is_empty() {
            tracing::debug!(
                server = %self.server(),
                count = drained.len(),
                "rejecting in-flight MCP requests"
            );
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(self.session_closed()));
        }
    }

    /// Number of requests still awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn register(&self, id: u64) -> Result<oneshot::Receiver<Reply>, McpError> {
        let mut pending = self.pending.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.session_closed());
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        Ok(rx)
    }

    async fn resolve(&self, resp: JsonRpcResponse) {
        let Some(id) = resp.numeric_id() else {
            tracing::warn!(server = %self.server(), id = %resp.id, "Dropping response with non-numeric id");
            return;
        };
        let Some(tx) = self.pending.lock().await.remove(&id) else {
            tracing::warn!(server = %self.server(), id, "Dropping response for unknown request id");
            return;
        };

        let reply = match (resp.error, resp.result) {
            (Some(err), _) => Err(McpError::Rpc {
                server: self.server().to_string(),
                code: err.code,
                message: err.message,
            }),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(McpError::Protocol(format!(
                "response {id} has neither result nor error"
            ))),
        };
        let _ = tx.send(reply);
    }

    /// Answer a provider-initiated request. Only `ping` is supported.
    fn answer(&self, id: Value, method: &str) {
        let reply = if method == "ping" {
            JsonRpcResponse::success(id, serde_json::json!({}))
        } else {
            tracing::debug!(server = %self.server(), method, "unsupported server request");
            JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
        };
        let line = match serde_json::to_string(&reply) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to encode reply: {e}");
                return;
            }
        };
        // Never waits, so a provider that stops reading cannot stall dispatch.
        if let Err(e) = self.transport.try_write(&line) {
            tracing::debug!(server = %self.server(), "Failed to answer server request: {e}");
        }
    }

    fn server(&self) -> &str {
        self.transport.command()
    }

    fn timed_out(&self, method: &str) -> McpError {
        McpError::Timeout {
            method: method.to_string(),
            timeout_ms: self.timeout_ms,
        }
    }

    fn session_closed(&self) -> McpError {
        McpError::SessionClosed {
            command: self.server().to_string(),
        }
    }
}
