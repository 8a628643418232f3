//! MCP SSE endpoint handlers.
//!
//! ## Endpoints
//!
//! - `GET <path>` - Open the SSE stream for a new connection
//! - `POST <path>?sessionId=<id>` - Deliver a JSON-RPC message to a connection

use axum::{
    extract::{Query, Request},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Extension, Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tower_sessions::Session;
use tracing::{debug, error, warn};

use crate::mcp::McpEndpoint;

/// Query parameters of a message POST.
#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Routes serving `endpoint` at its configured path.
///
/// Merge the result into the application router rather than nesting it, so
/// the advertised message URI matches the route.
pub fn mcp_routes(endpoint: McpEndpoint) -> Router {
    Router::new()
        .route(endpoint.path(), get(sse_connect).post(sse_message))
        .layer(Extension(endpoint))
}

/// Validate Origin header for DNS rebinding protection.
///
/// Only loopback hosts are accepted, compared exactly against the parsed
/// origin host.
fn validate_origin(headers: &HeaderMap) -> bool {
    let Some(origin) = headers.get(header::ORIGIN) else {
        // No Origin header - accept (common for non-browser clients)
        return true;
    };
    let accepted = origin
        .to_str()
        .ok()
        .and_then(|o| o.parse::<Uri>().ok())
        .is_some_and(|uri| is_loopback_origin(&uri));
    if !accepted {
        warn!("Rejecting MCP request from origin: {:?}", origin);
    }
    accepted
}

fn is_loopback_origin(uri: &Uri) -> bool {
    let scheme_ok = matches!(uri.scheme_str(), Some("http" | "https"));
    let host_ok = matches!(uri.host(), Some("localhost" | "127.0.0.1" | "[::1]"));
    scheme_ok && host_ok
}

fn forbidden_origin() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"error": "Invalid origin"})),
    )
        .into_response()
}

/// GET <path> - Open an SSE stream.
///
/// The first event is `endpoint`, carrying the URI for message POSTs.
/// JSON-RPC responses follow as `message` events.
pub async fn sse_connect(
    Extension(endpoint): Extension<McpEndpoint>,
    request: Request,
) -> Response {
    if !validate_origin(request.headers()) {
        return forbidden_origin();
    }

    let session = request.extensions().get::<Session>().cloned();
    if session.is_none() {
        debug!("MCP: No session layer installed, session writes will fail");
    }

    match endpoint.connect(session).await {
        Ok(connected) => {
            let stream = connected
                .events
                .map(|message| Ok::<_, Infallible>(message.into_event()));
            Sse::new(stream)
                .keep_alive(KeepAlive::new().interval(endpoint.keep_alive()))
                .into_response()
        }
        Err(e) => {
            error!("MCP: Failed to open connection: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

/// POST <path>?sessionId=<id> - Deliver a client message.
///
/// Returns `202 Accepted` once the message is queued; the reply arrives on
/// the SSE stream.
pub async fn sse_message(
    Extension(endpoint): Extension<McpEndpoint>,
    Query(query): Query<MessageQuery>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !validate_origin(&headers) {
        return forbidden_origin();
    }

    let Some(session_id) = query.session_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing sessionId parameter"})),
        )
            .into_response();
    };

    let Some(transport) = endpoint.registry().get(&session_id) else {
        debug!("MCP: Message for unknown session {}", session_id);
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Session not found"})),
        )
            .into_response();
    };

    match transport.deliver(body).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            warn!("MCP: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "Session is closed"})),
            )
                .into_response()
        }
    }
}
