//! MCP JSON-RPC request handler.
//!
//! Maps one decoded message to a reply. Tool calls are not run here; they
//! are returned as [`Dispatch::ToolCall`] so the connection can run them
//! concurrently.

use super::lifecycle::ConnectionState;
use super::server::ServerSetup;
use mcp_bridge_types::jsonrpc::{INVALID_PARAMS, METHOD_NOT_FOUND, SERVER_NOT_INITIALIZED};
use mcp_bridge_types::server::negotiate_protocol_version;
use mcp_bridge_types::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// What the connection should do with a message.
#[derive(Debug)]
pub enum Dispatch {
    /// Send this response
    Reply(JsonRpcResponse),
    /// Run a tool call and answer with its result
    ToolCall { id: Value, params: CallToolParams },
    /// Notification, nothing to send
    Ignore,
}

/// Handle an MCP JSON-RPC message.
pub fn dispatch(
    setup: &ServerSetup,
    state: &mut ConnectionState,
    request: JsonRpcRequest,
) -> Dispatch {
    let Some(id) = request.id else {
        handle_notification(&request.method);
        return Dispatch::Ignore;
    };
    debug!("MCP: Handling method: {}", request.method);

    match request.method.as_str() {
        "initialize" => handle_initialize(setup, state, id, request.params),
        "ping" => Dispatch::Reply(JsonRpcResponse::success(id, json!({}))),
        "tools/list" | "tools/call" if *state != ConnectionState::Active => {
            warn!("MCP: {} received before initialize", request.method);
            Dispatch::Reply(JsonRpcResponse::error(
                id,
                SERVER_NOT_INITIALIZED,
                "Server not initialized",
            ))
        }
        "tools/list" => Dispatch::Reply(reply(
            id,
            &ListToolsResult {
                tools: setup.tools.list(),
                next_cursor: None,
            },
        )),
        "tools/call" => {
            match serde_json::from_value::<CallToolParams>(request.params.unwrap_or(Value::Null)) {
                Ok(params) => Dispatch::ToolCall { id, params },
                Err(e) => Dispatch::Reply(JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    format!("Invalid tools/call params: {}", e),
                )),
            }
        }
        _ => Dispatch::Reply(JsonRpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        )),
    }
}

fn handle_notification(method: &str) {
    match method {
        "notifications/initialized" => debug!("MCP: Client finished initialization"),
        "notifications/cancelled" => debug!("MCP: Client cancelled a request"),
        other => debug!("MCP: Ignoring notification {}", other),
    }
}

/// Answer the handshake and mark the connection active.
fn handle_initialize(
    setup: &ServerSetup,
    state: &mut ConnectionState,
    id: Value,
    params: Option<Value>,
) -> Dispatch {
    let params: InitializeParams = match serde_json::from_value(params.unwrap_or(Value::Null)) {
        Ok(params) => params,
        Err(e) => {
            return Dispatch::Reply(JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                format!("Invalid initialize params: {}", e),
            ))
        }
    };

    let protocol_version = negotiate_protocol_version(&params.protocol_version);
    info!(
        "MCP: Client {} {} initialized (protocol {})",
        params.client_info.name, params.client_info.version, protocol_version
    );

    let result = InitializeResult {
        protocol_version: protocol_version.to_string(),
        capabilities: setup.capabilities.clone(),
        server_info: setup.info.clone(),
        instructions: setup.instructions.clone(),
    };
    *state = ConnectionState::Active;
    Dispatch::Reply(reply(id, &result))
}

/// Serialize a result payload into a success response.
pub fn reply<T: Serialize>(id: Value, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(
            id,
            mcp_bridge_types::jsonrpc::INTERNAL_ERROR,
            format!("Failed to serialize result: {}", e),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::context::{CallContext, ToolCallContext};
    use crate::mcp::server::ServerBuilder;
    use crate::mcp::session::SessionAccess;

    fn setup() -> ServerSetup {
        let mut builder = ServerBuilder::new("s1", SessionAccess::detached());
        builder.name("test-server").version("0.0.1").tool(
            "echo",
            "Echo the message",
            json!({"type": "object", "properties": {"message": {"type": "string"}}}),
            |ctx: ToolCallContext| async move {
                let message = ctx.require_string("message")?.to_string();
                ctx.respond_text(message);
                Ok(())
            },
        );
        builder.finish().unwrap()
    }

    fn initialize_request() -> JsonRpcRequest {
        JsonRpcRequest::new(
            1,
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "1.0"}
            })),
        )
    }

    fn expect_reply(dispatch: Dispatch) -> JsonRpcResponse {
        match dispatch {
            Dispatch::Reply(resp) => resp,
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_initialize_activates_and_advertises_tools() {
        let setup = setup();
        let mut state = ConnectionState::Connecting;

        let resp = expect_reply(dispatch(&setup, &mut state, initialize_request()));

        assert_eq!(state, ConnectionState::Active);
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], json!("2024-11-05"));
        assert_eq!(result["serverInfo"]["name"], json!("test-server"));
        assert_eq!(result["capabilities"]["tools"], json!({}));
    }

    #[test]
    fn test_invalid_initialize_params() {
        let setup = setup();
        let mut state = ConnectionState::Connecting;

        let resp = expect_reply(dispatch(
            &setup,
            &mut state,
            JsonRpcRequest::new(1, "initialize", Some(json!({"nope": true}))),
        ));

        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
        assert_eq!(state, ConnectionState::Connecting);
    }

    #[test]
    fn test_tools_rejected_before_initialize() {
        let setup = setup();
        let mut state = ConnectionState::Connecting;

        let resp = expect_reply(dispatch(
            &setup,
            &mut state,
            JsonRpcRequest::new(2, "tools/list", None),
        ));
        assert_eq!(resp.error.unwrap().code, SERVER_NOT_INITIALIZED);
    }

    #[test]
    fn test_tools_list_after_initialize() {
        let setup = setup();
        let mut state = ConnectionState::Active;

        let resp = expect_reply(dispatch(
            &setup,
            &mut state,
            JsonRpcRequest::new(2, "tools/list", None),
        ));
        let tools = &resp.result.unwrap()["tools"];
        assert_eq!(tools[0]["name"], json!("echo"));
        assert_eq!(tools[0]["inputSchema"]["type"], json!("object"));
    }

    #[test]
    fn test_tools_call_is_deferred() {
        let setup = setup();
        let mut state = ConnectionState::Active;

        match dispatch(
            &setup,
            &mut state,
            JsonRpcRequest::new(
                3,
                "tools/call",
                Some(json!({"name": "echo", "arguments": {"message": "hi"}})),
            ),
        ) {
            Dispatch::ToolCall { id, params } => {
                assert_eq!(id, json!(3));
                assert_eq!(params.name, "echo");
            }
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_tools_call_without_name_is_invalid_params() {
        let setup = setup();
        let mut state = ConnectionState::Active;

        let resp = expect_reply(dispatch(
            &setup,
            &mut state,
            JsonRpcRequest::new(3, "tools/call", Some(json!({}))),
        ));
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
    }

    #[test]
    fn test_ping_and_unknown_method() {
        let setup = setup();
        let mut state = ConnectionState::Connecting;

        let pong = expect_reply(dispatch(&setup, &mut state, JsonRpcRequest::new(4, "ping", None)));
        assert_eq!(pong.result, Some(json!({})));

        let missing = expect_reply(dispatch(
            &setup,
            &mut state,
            JsonRpcRequest::new(5, "prompts/list", None),
        ));
        let error = missing.error.unwrap();
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert!(error.message.contains("prompts/list"));
    }

    #[test]
    fn test_notifications_are_ignored() {
        let setup = setup();
        let mut state = ConnectionState::Active;

        for method in ["notifications/initialized", "notifications/cancelled", "tools/call"] {
            assert!(matches!(
                dispatch(&setup, &mut state, JsonRpcRequest::notification(method, None)),
                Dispatch::Ignore
            ));
        }
    }
}
