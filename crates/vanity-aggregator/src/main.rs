//! # Vanity Aggregator
//!
//! HTTP webhook that records the best vanity address scores.

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};
use vanity_aggregator::{create_router, AppState};
use vanity_config::ConfigLoader;
use vanity_core::telemetry::init_logging;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Aggregator error: {:#}", e);
        eprintln!("vanity-aggregator: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ConfigLoader::from_default_location()
        .load()
        .context("failed to load configuration")?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
        &["tower_http=debug"],
    )?;

    info!("Starting Vanity Aggregator...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let state = AppState::with_log_path(&config.aggregator.score_log_path);
    let router = create_router(state);

    let addr = config.aggregator.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(
        score_log = %config.aggregator.score_log_path,
        "Server is running on http://{}", addr
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. If the handlers cannot be installed the
/// server keeps running until killed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        () = ctrl_c => "SIGINT",
        () = terminate => "SIGTERM",
    };
    info!(signal, "Shutdown requested, draining connections");
}
