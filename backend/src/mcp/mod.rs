//! MCP (Model Context Protocol) over Server-Sent Events.
//!
//! Implements the HTTP+SSE transport: a client opens a long-lived SSE stream
//! and posts its JSON-RPC messages to a per-connection message URI.
//!
//! ## Endpoints
//!
//! - `GET <path>` - Open the SSE stream. The first event is `endpoint`,
//!   carrying `<path>?sessionId=<id>`.
//! - `POST <path>?sessionId=<id>` - Send a JSON-RPC message. Responses are
//!   delivered as `message` events on the stream.
//!
//! ## Connections
//!
//! Every stream gets its own [`ServerSetup`], built by running the
//! application's configuration closure against a [`ServerBuilder`]. Tool
//! handlers receive a [`ToolCallContext`] with their arguments and the
//! client's session data.

pub mod context;
pub mod handler;
pub mod lifecycle;
pub mod registry;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;

pub use context::{ArgumentError, CallContext, ContextError, HttpCallContext, ToolCallContext};
pub use lifecycle::{CloseReason, ConnectError, Connected, ConnectionState, McpEndpoint};
pub use registry::ConnectionRegistry;
pub use server::{CapabilitySetting, Configure, ServerBuilder, ServerConfigError, ServerSetup};
pub use session::{SessionAccess, SessionError};
pub use tools::{ToolBuilder, ToolError, ToolHandler, ToolRegistry};
pub use transport::{ServerMessage, SseTransport, TransportError};
