use anyhow::{Context, Result};
use clap::Parser;
use codebox_sandbox::SandboxService;
use codebox_server::{create_router, logging, CliArgs};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = args.resolve()?;
    let _log_guard = logging::init(args.verbose, config.log_dir.as_deref());

    info!("Starting codebox...");
    info!(
        bind = %config.bind_addr,
        scratch = %config.scratch_dir.display(),
        default_timeout_secs = config.default_timeout.as_secs(),
        max_timeout_secs = config.max_timeout.as_secs(),
        "Configuration loaded"
    );

    let service = Arc::new(
        SandboxService::start(config.sandbox_config())
            .await
            .context("Failed to initialize execution session")?,
    );

    let app = create_router(service.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    service.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
