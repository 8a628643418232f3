//! MCP bridge library.
//!
//! Serves MCP tools over Server-Sent Events from an axum application, with
//! tool handlers that can read and write the caller's tower-sessions
//! session. This module exposes the application builder for use in tests.

use axum::http::HeaderValue;
use axum::http::{header, Method};
use axum::{
    middleware,
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{cookie::time::Duration, Expiry, MemoryStore, SessionManagerLayer};

pub mod api;
pub mod auth;
pub mod config;
pub mod demo;
pub mod mcp;

use config::Config;
use mcp::McpEndpoint;

/// Create the Axum application router with default configuration.
///
/// This function is used by integration tests.
pub fn create_app() -> Router {
    let config = Config::default();
    let endpoint = create_endpoint(&config);
    create_app_with_config(&config, auth::AuthConfig::from_env(), endpoint)
}

/// Create the demo MCP endpoint described by `config`.
pub fn create_endpoint(config: &Config) -> McpEndpoint {
    McpEndpoint::new(demo::configure(config.server_name.clone()))
        .with_path(config.mcp_path.clone())
        .with_keep_alive(config.keep_alive)
        .with_channel_capacity(config.channel_capacity)
        .with_session_keys(config.session_keys.iter().cloned())
}

/// Create the Axum application router serving `endpoint`.
///
/// If `config.cors_allowed_origins` is empty, any origin is allowed.
/// Otherwise, only the specified origins are allowed.
pub fn create_app_with_config(
    config: &Config,
    auth_config: auth::AuthConfig,
    endpoint: McpEndpoint,
) -> Router {
    let auth_config = Arc::new(auth_config);

    if auth_config.enabled {
        tracing::info!("Authentication enabled");
        if auth_config.has_session_auth() {
            tracing::info!("  - Session authentication configured");
        }
        if auth_config.has_api_key_auth() {
            tracing::info!("  - API key authentication configured");
        }
    } else {
        tracing::warn!("Authentication disabled - all endpoints are public!");
    }

    // Create session store (in-memory, sessions lost on restart)
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_expiry(Expiry::OnInactivity(Duration::hours(
            config.session_expiry_hours,
        )))
        .with_secure(false);

    // MCP endpoint (requires authentication)
    let mcp_router =
        api::mcp::mcp_routes(endpoint.clone()).layer(middleware::from_fn(auth::auth_middleware));

    let api_router = Router::new()
        .route("/login", post(auth::login_handler))
        .route("/logout", post(auth::logout_handler))
        .route("/auth/status", get(auth::auth_status_handler))
        .route("/whoami", get(api::whoami::whoami).post(api::whoami::whoami));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api_router)
        .merge(mcp_router)
        .layer(Extension(endpoint))
        .layer(Extension(auth_config))
        .layer(session_layer)
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::AUTHORIZATION,
                    header::ACCEPT,
                    header::COOKIE,
                ]);

            // If no origins specified, allow any origin
            // Otherwise, restrict to the specified origins
            if config.cors_allowed_origins.is_empty() {
                cors.allow_origin(Any)
            } else {
                let origins: Vec<HeaderValue> = config
                    .cors_allowed_origins
                    .iter()
                    .filter_map(|o| o.parse::<HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins).allow_credentials(true)
            }
        })
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint.
async fn health() -> &'static str {
    "OK"
}
