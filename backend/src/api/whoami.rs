//! Plain HTTP counterpart of the `whoami` tool.

use axum::{body::Bytes, http::HeaderMap, response::IntoResponse, Extension};
use tower_sessions::Session;
use tracing::error;

use crate::demo;
use crate::mcp::{HttpCallContext, McpEndpoint, SessionAccess};

/// GET /api/whoami - Report the logged-in user of the caller's session.
pub async fn whoami(
    Extension(endpoint): Extension<McpEndpoint>,
    session: Session,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let session = match SessionAccess::load(Some(session), endpoint.session_keys()).await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to load session: {}", e);
            return axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let ctx = HttpCallContext::new(headers, body, session);
    demo::whoami(&ctx);
    ctx.into_response()
}
