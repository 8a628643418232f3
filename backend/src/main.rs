//! MCP bridge demo server.

use clap::{Parser, Subcommand};
use std::path::Path;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_bridge::{
    auth::{self, AuthConfig},
    config::{CliOverrides, Config},
    create_app_with_config, create_endpoint,
};

/// MCP bridge - MCP tools over SSE with session affinity
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Path of the MCP SSE endpoint
    #[arg(long)]
    mcp_path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a bcrypt hash for MCP_BRIDGE_ADMIN_PASSWORD_HASH
    HashPassword {
        #[arg(env = "MCP_BRIDGE_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(Command::HashPassword { password }) = args.command {
        println!("{}", auth::hash_password(&password)?);
        return Ok(());
    }

    let config = Config::from_figment(CliOverrides {
        host: args.host,
        port: args.port,
        mcp_path: args.mcp_path,
        log_level: args.log_level,
    })?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&config)?;
    info!("Starting MCP bridge server...");
    info!("Configuration loaded");

    let endpoint = create_endpoint(&config);
    let app = create_app_with_config(&config, AuthConfig::from_env(), endpoint.clone());

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        "Server listening on {}, MCP endpoint at {}",
        listener.local_addr()?,
        endpoint.path()
    );

    // Set up graceful shutdown handler
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        info!("Received Ctrl+C, shutting down gracefully...");

        // Open SSE streams would otherwise keep the server alive
        endpoint.shutdown();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shut down");
    Ok(())
}

/// Initialize logging - RUST_LOG, then the configured level, then "info".
///
/// When a log file is configured, logs go to both stdout and the file.
fn init_logging(config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.log_level.as_deref().unwrap_or("info"))
    });
    let stdout = fmt::layer().with_target(false).compact();

    let Some(log_file) = &config.log_file else {
        tracing_subscriber::registry().with(filter).with(stdout).init();
        return Ok(None);
    };

    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = log_file
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("log_file has no file name: {}", log_file.display()))?;
    std::fs::create_dir_all(dir)?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();

    Ok(Some(guard))
}
