//! Tracing setup for the server binary

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// Logs go to stderr, and also to `log_dir/codebox.log.<date>` when a
/// directory is given. Keep the returned guard alive to flush file output.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { "info" };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "codebox.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "codebox={level},codebox_server={level},codebox_sandbox={level},tower_http={level}"
            ))
        }))
        .init();

    guard
}
