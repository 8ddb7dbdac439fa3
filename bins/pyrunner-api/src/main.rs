mod handlers;
mod routes;

use anyhow::Context;
use pyrunner_common::config::RunnerConfig;
use pyrunner_sandbox::Sandbox;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

pub struct AppState {
    pub sandbox: Sandbox,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .with_line_number(true)
        .init();

    info!("pyrunner API booting...");

    let config = RunnerConfig::load_default().map_err(|e| {
        error!("Failed to load runner configuration: {:#}", e);
        e
    })?;
    config.validate().context("Invalid runner configuration")?;

    info!(
        interpreter = %config.interpreter,
        timeout_ms = config.timeout_ms,
        workspace_root = %config.workspace_root.display(),
        "Runner configured"
    );
    info!("Accepted attachment formats: {}", config.accepted_formats.display_string());

    let sandbox = Sandbox::new(config.clone());

    // Nothing is in flight yet, so anything under the root is a leftover
    let swept = sandbox.workspaces().sweep_stale().await;
    if swept > 0 {
        warn!(swept, "Cleaned up workspaces from a previous run");
    }

    let state = Arc::new(AppState { sandbox });

    let app = routes::routes(&config)?.with_state(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("HTTP server listening on {}", config.bind_addr);
    info!("Ready to accept scripts");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("pyrunner API shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
    warn!("Received shutdown signal, finishing in-flight requests...");
}
