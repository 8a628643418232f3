//! Connection lifecycle.
//!
//! [`McpEndpoint::connect`] sets up a connection: it snapshots the session,
//! registers a transport, evaluates the server configuration and spawns the
//! task that serves the connection. The task owns the registry entry through
//! a [`RegistrationGuard`], so the entry is removed on every exit path.

use super::handler::{self, Dispatch};
use super::registry::{ConnectionRegistry, RegistrationGuard};
use super::server::{Configure, ServerBuilder, ServerConfigError, ServerSetup};
use super::session::{SessionAccess, SessionError};
use super::tools::{call_tool, CallCancelled};
use super::transport::{ServerMessage, SseTransport};
use futures::stream::{BoxStream, StreamExt};
use mcp_bridge_types::jsonrpc::{INVALID_REQUEST, PARSE_ERROR};
use mcp_bridge_types::{JsonRpcRequest, JsonRpcResponse, DEFAULT_MCP_PATH};
use serde_json::Value;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_sessions::Session;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);
const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Stream open, waiting for `initialize`
    Connecting,
    /// Handshake complete
    Active,
    /// Shutting down, no new messages are processed
    Closing,
    Closed,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloseReason {
    #[error("connection cancelled")]
    Cancelled,

    #[error("tool '{0}' cancelled the connection")]
    ToolCancelled(String),

    #[error("client stream is gone")]
    StreamClosed,
}

/// Error type for setting up a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to load session: {0}")]
    Session(#[from] SessionError),

    #[error("invalid server configuration: {0}")]
    Config(#[from] ServerConfigError),

    #[error("failed to announce endpoint for session {0}")]
    Announce(String),
}

/// A freshly established connection.
pub struct Connected {
    pub session_id: String,
    /// Messages for the SSE response body, starting with the endpoint event
    pub events: BoxStream<'static, ServerMessage>,
    /// Task serving the connection
    pub task: JoinHandle<CloseReason>,
}

impl std::fmt::Debug for Connected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connected")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// An MCP SSE endpoint: configuration plus the live connection registry.
///
/// Cloning is cheap and clones share the registry and shutdown token.
#[derive(Clone)]
pub struct McpEndpoint {
    path: Arc<str>,
    configure: Configure,
    registry: ConnectionRegistry,
    keep_alive: Duration,
    channel_capacity: usize,
    session_keys: Arc<[String]>,
    shutdown: CancellationToken,
}

impl McpEndpoint {
    /// Create an endpoint served at the default path.
    ///
    /// No session keys are loaded by default, so tool handlers read `None`
    /// for every key until they are listed with [`Self::with_session_keys`].
    pub fn new<F>(configure: F) -> Self
    where
        F: Fn(&mut ServerBuilder) + Send + Sync + 'static,
    {
        Self {
            path: Arc::from(DEFAULT_MCP_PATH),
            configure: Arc::new(configure),
            registry: ConnectionRegistry::new(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            session_keys: Arc::from(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Path serving both the SSE stream and message POSTs.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Arc::from(path.into());
        self
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Session keys loaded into each connection's snapshot.
    pub fn with_session_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.session_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn session_keys(&self) -> &[String] {
        &self.session_keys
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Cancel every connection, current and future.
    pub fn shutdown(&self) {
        info!(
            "MCP: Shutting down endpoint with {} open connection(s)",
            self.registry.len()
        );
        self.shutdown.cancel();
    }

    /// Establish a connection for a client opening the SSE stream.
    pub async fn connect(&self, session: Option<Session>) -> Result<Connected, ConnectError> {
        let session = SessionAccess::load(session, &self.session_keys).await?;
        let session_id = Uuid::new_v4().to_string();

        let (transport, channels) = SseTransport::new(
            session_id.clone(),
            self.channel_capacity,
            self.shutdown.child_token(),
        );
        let transport = Arc::new(transport);
        let registration = self.registry.register(transport.clone());
        debug!("MCP: Connection {} registered", session_id);

        let mut builder = ServerBuilder::new(&session_id, session.clone());
        (self.configure)(&mut builder);
        let setup = builder.finish().inspect_err(|e| {
            error!("MCP: Rejecting connection {}: {}", session_id, e);
        })?;

        let endpoint_uri = format!("{}?sessionId={}", self.path, session_id);
        transport
            .send_message(ServerMessage::Endpoint(endpoint_uri))
            .await
            .map_err(|_| ConnectError::Announce(session_id.clone()))?;

        let cancel = transport.cancellation().clone();
        let connection = Connection {
            transport,
            setup,
            session,
            inbound: channels.inbound,
            state: ConnectionState::Connecting,
            calls: JoinSet::new(),
            _registration: registration,
        };
        let task = tokio::spawn(connection.run());

        // Dropping the response body means the client went away
        let cancel_on_drop = cancel.clone().drop_guard();
        let events = ReceiverStream::new(channels.outbound)
            .take_until(cancel.cancelled_owned())
            .map(move |message| {
                let _ = &cancel_on_drop;
                message
            })
            .boxed();

        info!("MCP: Client connected, session {}", session_id);
        Ok(Connected {
            session_id,
            events,
            task,
        })
    }
}

impl std::fmt::Debug for McpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpEndpoint")
            .field("path", &self.path)
            .field("connections", &self.registry.len())
            .field("keep_alive", &self.keep_alive)
            .field("channel_capacity", &self.channel_capacity)
            .field("session_keys", &self.session_keys)
            .finish()
    }
}

/// Outcome of one spawned tool call.
enum CallOutcome {
    Reply(JsonRpcResponse),
    Cancelled(CallCancelled),
}

/// State owned by the task serving one connection.
struct Connection {
    transport: Arc<SseTransport>,
    setup: ServerSetup,
    session: SessionAccess,
    inbound: mpsc::Receiver<String>,
    state: ConnectionState,
    calls: JoinSet<CallOutcome>,
    _registration: RegistrationGuard,
}

impl Connection {
    async fn run(mut self) -> CloseReason {
        let reason = self.serve().await;

        self.state = ConnectionState::Closing;
        debug!(
            "MCP: Closing {} ({} call(s) in flight)",
            self.transport.session_id(),
            self.calls.len()
        );
        self.calls.abort_all();
        self.transport.close();
        self.state = ConnectionState::Closed;

        info!(
            "MCP: Connection {} closed: {}",
            self.transport.session_id(),
            reason
        );
        reason
    }

    async fn serve(&mut self) -> CloseReason {
        let cancel = self.transport.cancellation().clone();
        loop {
            let flow = tokio::select! {
                biased;
                _ = cancel.cancelled() => ControlFlow::Break(CloseReason::Cancelled),
                Some(joined) = self.calls.join_next(), if !self.calls.is_empty() => {
                    match joined {
                        Ok(CallOutcome::Reply(response)) => send(&self.transport, &response).await,
                        Ok(CallOutcome::Cancelled(cancelled)) => {
                            warn!("MCP: {}", cancelled);
                            ControlFlow::Break(CloseReason::ToolCancelled(cancelled.tool))
                        }
                        Err(e) => {
                            error!("MCP: Tool call task failed: {}", e);
                            ControlFlow::Continue(())
                        }
                    }
                }
                raw = self.inbound.recv() => match raw {
                    Some(raw) => self.handle_message(raw).await,
                    None => ControlFlow::Break(CloseReason::StreamClosed),
                },
            };

            if let ControlFlow::Break(reason) = flow {
                return reason;
            }
        }
    }

    async fn handle_message(&mut self, raw: String) -> ControlFlow<CloseReason> {
        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("MCP: Failed to parse message: {}", e);
                let response =
                    JsonRpcResponse::error(Value::Null, PARSE_ERROR, format!("Parse error: {}", e));
                return send(&self.transport, &response).await;
            }
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                let response =
                    JsonRpcResponse::error(id, INVALID_REQUEST, format!("Invalid request: {}", e));
                return send(&self.transport, &response).await;
            }
        };

        match handler::dispatch(&self.setup, &mut self.state, request) {
            Dispatch::Reply(response) => send(&self.transport, &response).await,
            Dispatch::ToolCall { id, params } => {
                let tools = self.setup.tools.clone();
                let session = self.session.clone();
                self.calls.spawn(async move {
                    match call_tool(&tools, &session, params).await {
                        Ok(result) => CallOutcome::Reply(handler::reply(id, &result)),
                        Err(cancelled) => CallOutcome::Cancelled(cancelled),
                    }
                });
                ControlFlow::Continue(())
            }
            Dispatch::Ignore => ControlFlow::Continue(()),
        }
    }
}

/// Queue a response, giving up if the connection is cancelled meanwhile.
async fn send(transport: &SseTransport, response: &JsonRpcResponse) -> ControlFlow<CloseReason> {
    tokio::select! {
        _ = transport.cancellation().cancelled() => ControlFlow::Break(CloseReason::Cancelled),
        sent = transport.send(response) => match sent {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                debug!("MCP: {}", e);
                ControlFlow::Break(CloseReason::StreamClosed)
            }
        },
    }
}
