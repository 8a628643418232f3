//! Demo tools served by the `mcp-bridge` binary.
//!
//! `whoami` and `visit_counter` show session affinity: a user who logs in
//! through `/api/login` and then opens the SSE stream with the same cookie
//! is recognised by the tools.

use async_trait::async_trait;
use axum::http::header;
use mcp_bridge_types::CallToolResult;
use serde::Deserialize;
use serde_json::json;

use crate::auth::SESSION_USER_KEY;
use crate::mcp::{CallContext, ServerBuilder, ToolBuilder, ToolCallContext, ToolError, ToolHandler};

/// Session key counting `visit_counter` calls.
pub const VISITS_KEY: &str = "visits";

/// Reported when no user is logged in.
pub const ANONYMOUS: &str = "anonymous";

/// Upper bound on `echo`'s `times` argument.
pub const MAX_ECHO_TIMES: usize = 100;

/// Upper bound on the size of an `echo` reply, in bytes.
const MAX_ECHO_BYTES: usize = 64 * 1024;

/// Build the configuration closure for the demo server.
pub fn configure(server_name: String) -> impl Fn(&mut ServerBuilder) + Send + Sync + 'static {
    move |server| {
        let session_id = server.session_id().to_string();
        server
            .name(server_name.clone())
            .version(env!("CARGO_PKG_VERSION"))
            .instructions("Log in through /api/login to have whoami recognise you.")
            .add_tool(
                ToolBuilder::new("echo")
                    .title("Echo")
                    .description("Echo the message back, optionally repeated")
                    .input_schema(json!({
                        "type": "object",
                        "properties": {
                            "message": {"type": "string"},
                            "times": {
                                "type": "integer",
                                "minimum": 1,
                                "maximum": MAX_ECHO_TIMES
                            }
                        },
                        "required": ["message"]
                    }))
                    .read_only(true)
                    .handler(echo),
            )
            .add_tool(
                ToolBuilder::new("whoami")
                    .description("Report the logged-in user of this session")
                    .read_only(true)
                    .handler(|ctx: ToolCallContext| async move {
                        whoami(&ctx);
                        Ok(())
                    }),
            )
            .add_tool(
                ToolBuilder::new("visit_counter")
                    .description("Count calls in this session and store the count")
                    .output_schema(json!({
                        "type": "object",
                        "properties": {"visits": {"type": "integer"}},
                        "required": ["visits"]
                    }))
                    .idempotent(false)
                    .handler(visit_counter),
            )
            .add_tool(
                ToolBuilder::new("connection_info")
                    .description("Describe the MCP connection serving this call")
                    .read_only(true)
                    .handler_impl(ConnectionInfo { session_id }),
            );
    }
}

#[derive(Debug, Deserialize)]
struct EchoArgs {
    message: String,
    #[serde(default = "one")]
    times: usize,
}

fn one() -> usize {
    1
}

async fn echo(ctx: ToolCallContext) -> Result<(), ToolError> {
    let args: EchoArgs = ctx.argument()?;
    if !(1..=MAX_ECHO_TIMES).contains(&args.times) {
        return Err(ToolError::failed(format!(
            "times must be between 1 and {MAX_ECHO_TIMES}"
        )));
    }
    let size = (args.message.len() + 1).checked_mul(args.times);
    if size.is_none_or(|size| size > MAX_ECHO_BYTES) {
        return Err(ToolError::failed(format!(
            "echo reply would exceed {MAX_ECHO_BYTES} bytes"
        )));
    }
    ctx.respond_text(vec![args.message; args.times].join(" "));
    Ok(())
}

/// Respond with the session's user, from an MCP call or a plain HTTP route.
pub fn whoami(ctx: &impl CallContext) {
    let user = ctx.session().read::<String>(SESSION_USER_KEY);
    // Only plain HTTP requests carry headers
    let user_agent = ctx
        .request_headers()
        .ok()
        .and_then(|headers| headers.get(header::USER_AGENT))
        .and_then(|value| value.to_str().ok());

    let mut body = json!({
        "user": user.as_deref().unwrap_or(ANONYMOUS),
        "authenticated": user.is_some(),
    });
    if let Some(user_agent) = user_agent {
        body["userAgent"] = json!(user_agent);
    }
    ctx.respond_structured(body);
}

async fn visit_counter(ctx: ToolCallContext) -> Result<(), ToolError> {
    let visits = ctx.session().read::<u64>(VISITS_KEY).unwrap_or(0) + 1;
    ctx.session().write(VISITS_KEY, &visits).await?;
    ctx.respond_structured(json!({ "visits": visits }));
    Ok(())
}

/// Reports the connection a call runs on.
struct ConnectionInfo {
    session_id: String,
}

#[async_trait]
impl ToolHandler for ConnectionInfo {
    async fn call(&self, ctx: ToolCallContext) -> Result<(), ToolError> {
        ctx.respond(CallToolResult::structured(json!({
            "sessionId": self.session_id,
            "tool": ctx.tool_name(),
            "sessionInstalled": ctx.session().is_installed(),
        })));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::session::SessionAccess;
    use crate::mcp::tools::call_tool;
    use mcp_bridge_types::CallToolParams;
    use serde_json::Value;
    use std::sync::Arc;
    use tower_sessions::{MemoryStore, Session};

    async fn setup_with(session: SessionAccess) -> crate::mcp::ServerSetup {
        let mut builder = ServerBuilder::new("demo-session", session);
        configure("demo".to_string())(&mut builder);
        builder.finish().unwrap()
    }

    fn params(name: &str, arguments: Value) -> CallToolParams {
        CallToolParams {
            name: name.to_string(),
            arguments: arguments.as_object().cloned(),
        }
    }

    #[tokio::test]
    async fn test_configure_registers_demo_tools() {
        let setup = setup_with(SessionAccess::detached()).await;

        let names: Vec<_> = setup.tools.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo", "whoami", "visit_counter", "connection_info"]);
        assert_eq!(setup.info.name, "demo");
        assert!(setup.capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn test_echo_repeats() {
        let session = SessionAccess::detached();
        let setup = setup_with(session.clone()).await;

        let result = call_tool(
            &setup.tools,
            &session,
            params("echo", json!({"message": "hi", "times": 3})),
        )
        .await
        .unwrap();
        assert_eq!(result.text_content(), "hi hi hi");

        let missing = call_tool(&setup.tools, &session, params("echo", json!({})))
            .await
            .unwrap();
        assert!(missing.is_error);
    }

    #[tokio::test]
    async fn test_echo_rejects_oversized_replies() {
        let session = SessionAccess::detached();
        let setup = setup_with(session.clone()).await;

        let huge = call_tool(
            &setup.tools,
            &session,
            params("echo", json!({"message": "hi", "times": 1u64 << 40})),
        )
        .await
        .unwrap();
        assert!(huge.is_error);
        assert!(huge.text_content().contains("between 1 and 100"));

        let long_message = "x".repeat(MAX_ECHO_BYTES);
        let too_long = call_tool(
            &setup.tools,
            &session,
            params("echo", json!({"message": long_message, "times": 2})),
        )
        .await
        .unwrap();
        assert!(too_long.is_error);
        assert!(too_long.text_content().contains("exceed"));

        let zero = call_tool(
            &setup.tools,
            &session,
            params("echo", json!({"message": "hi", "times": 0})),
        )
        .await
        .unwrap();
        assert!(zero.is_error);
    }

    #[tokio::test]
    async fn test_whoami_reads_session_user() {
        let store = Arc::new(MemoryStore::default());
        let raw = Session::new(None, store, None);
        raw.insert(SESSION_USER_KEY, "alice").await.unwrap();
        let session = SessionAccess::load(Some(raw), &[SESSION_USER_KEY.to_string()])
            .await
            .unwrap();
        let setup = setup_with(session.clone()).await;

        let result = call_tool(&setup.tools, &session, params("whoami", json!({})))
            .await
            .unwrap();
        assert_eq!(
            result.structured_content,
            Some(json!({"user": "alice", "authenticated": true}))
        );
    }

    #[tokio::test]
    async fn test_visit_counter_persists() {
        let store = Arc::new(MemoryStore::default());
        let raw = Session::new(None, store, None);
        let session = SessionAccess::load(Some(raw.clone()), &[VISITS_KEY.to_string()])
            .await
            .unwrap();
        let setup = setup_with(session.clone()).await;

        for expected in 1..=2u64 {
            let result = call_tool(&setup.tools, &session, params("visit_counter", json!({})))
                .await
                .unwrap();
            assert_eq!(result.structured_content, Some(json!({"visits": expected})));
        }
        assert_eq!(raw.get::<u64>(VISITS_KEY).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_visit_counter_without_session_layer_fails_loudly() {
        let session = SessionAccess::detached();
        let setup = setup_with(session.clone()).await;

        let result = call_tool(&setup.tools, &session, params("visit_counter", json!({})))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.text_content().contains("no session layer"));
    }

    #[tokio::test]
    async fn test_connection_info_reports_session_id() {
        let session = SessionAccess::detached();
        let setup = setup_with(session.clone()).await;

        let result = call_tool(&setup.tools, &session, params("connection_info", json!({})))
            .await
            .unwrap();
        let structured = result.structured_content.unwrap();
        assert_eq!(structured["sessionId"], json!("demo-session"));
        assert_eq!(structured["sessionInstalled"], json!(false));
    }
}
