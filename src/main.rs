//! MCP server binary entry point.

use anyhow::{Context, Result};
use mcp_runtime::{ServerConfig, logging, protocol::McpServerBuilder, tools::create_registry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let result = runtime.block_on(run());

    // A stdin read parks a blocking thread that cannot be interrupted.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn run() -> Result<()> {
    let config = load_config()?;
    logging::init(&config)?;

    info!("Starting {} v{}", config.name, config.version);

    let tools = Arc::new(create_registry()?);
    info!("Registered {} tools", tools.len());

    let server = Arc::new(
        McpServerBuilder::new()
            .config(config.clone())
            .with_tools(false, false)
            .tool_registry(tools)
            .build()?,
    );

    let cancel = CancellationToken::new();
    let mut serve = tokio::spawn({
        let server = Arc::clone(&server);
        let cancel = cancel.clone();
        async move { server.serve_stdio(cancel).await }
    });

    info!("MCP server ready, waiting for messages on stdin");

    tokio::select! {
        _ = shutdown_signal() => info!("Received termination signal"),
        result = &mut serve => {
            match result {
                Ok(Ok(())) => info!("Server loop finished"),
                Ok(Err(e)) => error!(error = %e, "Server terminated due to error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
            info!("Server shutdown complete");
            return Ok(());
        }
    }

    let cancelled = server.cancel_all_requests();
    cancel.cancel();
    info!(cancelled, "Gracefully shutting down");

    match tokio::time::timeout(config.shutdown_timeout, serve).await {
        Ok(_) => info!("All tasks exited"),
        Err(_) => warn!("Shutdown timed out, forcing exit"),
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Configuration from `--config <path>` (or `MCP_CONFIG`), then environment overrides.
fn load_config() -> Result<ServerConfig> {
    let path = config_path();
    let config = match &path {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    Ok(config.apply_env()?)
}

fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    std::env::var_os("MCP_CONFIG").map(PathBuf::from)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
