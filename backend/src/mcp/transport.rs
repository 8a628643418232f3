//! SSE transport for one connected MCP client.
//!
//! Server-to-client messages travel over the SSE stream; client-to-server
//! messages arrive as separate POST requests and are handed to the
//! connection task through the inbound channel.

use axum::response::sse::Event;
use mcp_bridge_types::JsonRpcResponse;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// SSE event name announcing the message endpoint.
pub const ENDPOINT_EVENT: &str = "endpoint";

/// SSE event name for JSON-RPC payloads.
pub const MESSAGE_EVENT: &str = "message";

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport for session {0} is closed")]
    Closed(String),

    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A message queued for the SSE stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// URI the client must POST its messages to
    Endpoint(String),
    /// A serialized JSON-RPC message
    Message(String),
}

impl ServerMessage {
    /// Convert to an SSE event.
    pub fn into_event(self) -> Event {
        match self {
            Self::Endpoint(uri) => Event::default().event(ENDPOINT_EVENT).data(uri),
            Self::Message(json) => Event::default().event(MESSAGE_EVENT).data(json),
        }
    }
}

/// Receiving halves handed to the connection that owns the transport.
#[derive(Debug)]
pub struct TransportChannels {
    /// Feeds the SSE response body
    pub outbound: mpsc::Receiver<ServerMessage>,
    /// Raw POST bodies for the dispatch loop
    pub inbound: mpsc::Receiver<String>,
}

/// One live SSE connection.
#[derive(Debug)]
pub struct SseTransport {
    session_id: String,
    outbound: mpsc::Sender<ServerMessage>,
    inbound: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl SseTransport {
    /// Create a transport with bounded channels of the given capacity.
    pub fn new(
        session_id: String,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, TransportChannels) {
        let capacity = capacity.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        (
            Self {
                session_id,
                outbound: outbound_tx,
                inbound: inbound_tx,
                cancel,
            },
            TransportChannels {
                outbound: outbound_rx,
                inbound: inbound_rx,
            },
        )
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Cancellation token scoped to this connection.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Terminate the connection.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.inbound.is_closed()
    }

    /// Hand a raw client message to the connection's dispatch loop.
    ///
    /// Waits for channel capacity, so a slow connection applies backpressure
    /// to its POST requests.
    pub async fn deliver(&self, raw: String) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed(self.session_id.clone()));
        }
        self.inbound
            .send(raw)
            .await
            .map_err(|_| TransportError::Closed(self.session_id.clone()))
    }

    /// Queue a JSON-RPC response on the SSE stream.
    pub async fn send(&self, response: &JsonRpcResponse) -> Result<(), TransportError> {
        let json = serde_json::to_string(response)?;
        self.send_message(ServerMessage::Message(json)).await
    }

    pub(crate) async fn send_message(&self, message: ServerMessage) -> Result<(), TransportError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| TransportError::Closed(self.session_id.clone()))
    }
}
