use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_sessions::Session;
use tracing::{info, warn};

/// Session key holding the logged-in username.
pub const SESSION_USER_KEY: &str = "user";

/// Authentication configuration loaded from environment variables
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Admin username (from MCP_BRIDGE_ADMIN_USER env var)
    pub admin_user: Option<String>,
    /// Admin password hash (from MCP_BRIDGE_ADMIN_PASSWORD_HASH env var)
    pub admin_password_hash: Option<String>,
    /// API key for bearer token auth (from MCP_BRIDGE_API_KEY env var)
    pub api_key: Option<String>,
    /// Whether authentication is enabled
    pub enabled: bool,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("MCP_BRIDGE_ADMIN_USER").ok(),
            std::env::var("MCP_BRIDGE_ADMIN_PASSWORD_HASH").ok(),
            std::env::var("MCP_BRIDGE_API_KEY").ok(),
        )
    }

    pub fn new(
        admin_user: Option<String>,
        admin_password_hash: Option<String>,
        api_key: Option<String>,
    ) -> Self {
        // Authentication is enabled if any method is configured
        let enabled = admin_user.is_some() || api_key.is_some();

        Self {
            admin_user,
            admin_password_hash,
            api_key,
            enabled,
        }
    }

    /// Check if session-based authentication is configured
    pub fn has_session_auth(&self) -> bool {
        self.admin_user.is_some() && self.admin_password_hash.is_some()
    }

    /// Check if API key authentication is configured
    pub fn has_api_key_auth(&self) -> bool {
        self.api_key.is_some()
    }

    /// Verify username and password against configured credentials
    pub fn verify_credentials(&self, username: &str, password: &str) -> bool {
        let (Some(admin_user), Some(admin_hash)) = (&self.admin_user, &self.admin_password_hash)
        else {
            return false;
        };

        if username != admin_user {
            return false;
        }

        bcrypt::verify(password, admin_hash).unwrap_or(false)
    }

    /// Verify API key
    pub fn verify_api_key(&self, key: &str) -> bool {
        self.api_key.as_ref().map(|k| k == key).unwrap_or(false)
    }
}

/// Login request payload
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
}

/// Authentication status response
#[derive(Debug, Serialize)]
pub struct AuthStatusResponse {
    pub authenticated: bool,
    pub auth_required: bool,
    pub user: Option<String>,
    pub methods: Vec<String>,
}

/// Authentication middleware that checks the session user and API key.
///
/// The API key is accepted as `Authorization: Bearer <key>` or `X-API-Key`.
pub async fn auth_middleware(
    Extension(config): Extension<Arc<AuthConfig>>,
    session: Session,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !config.enabled {
        return Ok(next.run(request).await);
    }

    if let Ok(Some(_)) = session.get::<String>(SESSION_USER_KEY).await {
        return Ok(next.run(request).await);
    }

    let headers = request.headers();
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());

    if bearer.or(api_key).is_some_and(|key| config.verify_api_key(key)) {
        return Ok(next.run(request).await);
    }

    warn!("Rejecting unauthenticated request to {}", request.uri().path());
    Err(StatusCode::UNAUTHORIZED)
}

/// Login handler
pub async fn login_handler(
    Extension(config): Extension<Arc<AuthConfig>>,
    session: Session,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, StatusCode> {
    if !config.has_session_auth() {
        return Ok(Json(LoginResponse {
            success: false,
            message: "Session authentication not configured".to_string(),
        }));
    }

    if config.verify_credentials(&payload.username, &payload.password) {
        session
            .insert(SESSION_USER_KEY, &payload.username)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        info!("User {} logged in", payload.username);

        Ok(Json(LoginResponse {
            success: true,
            message: "Login successful".to_string(),
        }))
    } else {
        Ok(Json(LoginResponse {
            success: false,
            message: "Invalid username or password".to_string(),
        }))
    }
}

/// Logout handler
pub async fn logout_handler(session: Session) -> Result<Json<LoginResponse>, StatusCode> {
    session
        .delete()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(LoginResponse {
        success: true,
        message: "Logged out successfully".to_string(),
    }))
}

/// Get authentication status
pub async fn auth_status_handler(
    Extension(config): Extension<Arc<AuthConfig>>,
    session: Session,
) -> Json<AuthStatusResponse> {
    let user = session
        .get::<String>(SESSION_USER_KEY)
        .await
        .ok()
        .flatten();

    let mut methods = Vec::new();
    if config.has_session_auth() {
        methods.push("session".to_string());
    }
    if config.has_api_key_auth() {
        methods.push("api_key".to_string());
    }

    Json(AuthStatusResponse {
        // If auth is disabled, consider everyone authenticated
        authenticated: !config.enabled || user.is_some(),
        auth_required: config.enabled,
        user,
        methods,
    })
}

/// Helper function to generate password hash for setup
/// Usage: mcp-bridge hash-password <password>
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
}
