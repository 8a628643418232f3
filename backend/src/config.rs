//! Configuration management.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use mcp_bridge_types::{DEFAULT_MCP_PATH, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local config file name, looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = ".mcp-bridge.toml";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "MCP_BRIDGE_";

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    mcp: McpConfig,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    /// Server name reported to MCP clients
    #[serde(default = "default_name")]
    name: String,
    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            name: default_name(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct McpConfig {
    #[serde(default = "default_mcp_path")]
    path: String,
    #[serde(default = "default_keep_alive_secs")]
    keep_alive_secs: u64,
    #[serde(default = "default_channel_capacity")]
    channel_capacity: usize,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            path: default_mcp_path(),
            keep_alive_secs: default_keep_alive_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionConfig {
    #[serde(default = "default_expiry_hours")]
    expiry_hours: i64,
    /// Session keys made available to tool handlers
    #[serde(default = "default_session_keys")]
    keys: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiry_hours: default_expiry_hours(),
            keys: default_session_keys(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LoggingConfig {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    log_level: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_mcp_path() -> String {
    DEFAULT_MCP_PATH.to_string()
}

fn default_keep_alive_secs() -> u64 {
    15
}

fn default_channel_capacity() -> usize {
    32
}

fn default_expiry_hours() -> i64 {
    24
}

fn default_session_keys() -> Vec<String> {
    vec![
        crate::auth::SESSION_USER_KEY.to_string(),
        crate::demo::VISITS_KEY.to_string(),
    ]
}

/// Values given on the command line. `None` leaves lower layers in effect.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub mcp_path: Option<String>,
    pub log_level: Option<String>,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Server name reported to MCP clients
    pub server_name: String,
    /// Allowed CORS origins; empty allows any origin
    pub cors_allowed_origins: Vec<String>,
    /// Path of the MCP SSE endpoint
    pub mcp_path: String,
    /// Interval between SSE keep-alive comments
    pub keep_alive: Duration,
    /// Capacity of each connection's message channels
    pub channel_capacity: usize,
    /// Session inactivity expiry in hours
    pub session_expiry_hours: i64,
    /// Session keys loaded for tool handlers
    pub session_keys: Vec<String>,
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    pub log_file: Option<PathBuf>,
    /// Log level (if set, overrides RUST_LOG environment variable)
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `.mcp-bridge.toml` in current directory
    /// 2. `config.toml` in user config directory (~/.config/mcp-bridge/ on Linux)
    pub fn from_figment(cli: CliOverrides) -> anyhow::Result<Self> {
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(LOCAL_CONFIG_FILE));
        let user_config = directories::ProjectDirs::from("", "", "mcp-bridge")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        Self::from_sources(user_config.as_deref(), local_config.as_deref(), cli)
    }

    fn from_sources(
        user_config: Option<&Path>,
        local_config: Option<&Path>,
        cli: CliOverrides,
    ) -> anyhow::Result<Self> {
        // Priority: defaults < user config < local config < env vars < CLI args
        let mut figment = Figment::new().merge(Serialized::defaults(ConfigFile {
            server: ServerConfig::default(),
            mcp: McpConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }));

        for path in [user_config, local_config].into_iter().flatten() {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        // Keys contain underscores, so only `__` separates sections
        figment = figment.merge(
            Env::prefixed(ENV_PREFIX).map(|key| key.as_str().replace("__", ".").into()),
        );

        if let Some(ref host) = cli.host {
            figment = figment.merge(Serialized::default("server.host", host));
        }
        if let Some(port) = cli.port {
            figment = figment.merge(Serialized::default("server.port", port));
        }
        if let Some(ref path) = cli.mcp_path {
            figment = figment.merge(Serialized::default("mcp.path", path));
        }
        if let Some(ref level) = cli.log_level {
            figment = figment.merge(Serialized::default("logging.log_level", level));
        }

        let config_file: ConfigFile = figment.extract()?;
        Self::from_file(config_file)
    }

    fn from_file(file: ConfigFile) -> anyhow::Result<Self> {
        if !file.mcp.path.starts_with('/') {
            anyhow::bail!("mcp.path must start with '/': {}", file.mcp.path);
        }
        if file.mcp.channel_capacity == 0 {
            anyhow::bail!("mcp.channel_capacity must be at least 1");
        }
        if file.mcp.keep_alive_secs == 0 {
            anyhow::bail!("mcp.keep_alive_secs must be at least 1");
        }

        Ok(Self {
            host: file.server.host,
            port: file.server.port,
            server_name: file.server.name,
            cors_allowed_origins: file.server.cors_allowed_origins,
            mcp_path: file.mcp.path,
            keep_alive: Duration::from_secs(file.mcp.keep_alive_secs),
            channel_capacity: file.mcp.channel_capacity,
            session_expiry_hours: file.session.expiry_hours,
            session_keys: file.session.keys,
            log_file: file.logging.log_file,
            log_level: file.logging.log_level,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_name: default_name(),
            cors_allowed_origins: Vec::new(),
            mcp_path: default_mcp_path(),
            keep_alive: Duration::from_secs(default_keep_alive_secs()),
            channel_capacity: default_channel_capacity(),
            session_expiry_hours: default_expiry_hours(),
            session_keys: default_session_keys(),
            log_file: None,
            log_level: None,
        }
    }
}
