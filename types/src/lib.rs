//! Shared protocol types for the MCP bridge.
//!
//! This crate contains the JSON-RPC envelopes and MCP payloads exchanged
//! between the SSE endpoint and its clients.

/// Default port for the demo server.
pub const DEFAULT_PORT: u16 = 8080;

/// Default mount path of the SSE endpoint.
pub const DEFAULT_MCP_PATH: &str = "/sse";

pub mod content;
pub mod jsonrpc;
pub mod server;
pub mod tool;

// Re-export commonly used types
pub use content::{CallToolResult, Content};
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use server::{
    CallToolParams, Implementation, InitializeParams, InitializeResult, ListToolsResult,
    PromptsCapability, ResourcesCapability, ServerCapabilities, ToolsCapability,
};
pub use tool::{Icon, Tool, ToolAnnotations};
