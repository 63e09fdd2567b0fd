//! Tracing setup: a console layer for human operators and, when detailed
//! logging is enabled, a second non-blocking file sink carrying one JSON
//! object per cycle under the `cycle` target.

use tokio::signal;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Must be held for the process lifetime — dropping it stops the
/// non-blocking writer from flushing.
pub struct DetailedLogGuard(#[allow(dead_code)] Option<WorkerGuard>);

pub fn init_tracing(detailed_log_path: Option<&std::path::Path>) -> DetailedLogGuard {
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,reqwest=warn,rumqttc=warn".into());
    let console_layer = tracing_subscriber::fmt::layer().with_filter(console_filter);

    match detailed_log_path {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("cycle.log"));
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let cycle_filter = EnvFilter::new("cycle=info");
            let cycle_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(cycle_filter);

            tracing_subscriber::registry().with(console_layer).with(cycle_layer).init();
            DetailedLogGuard(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(console_layer).init();
            DetailedLogGuard(None)
        }
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! { _ = ctrl_c => {}, _ = terminate => {}, }
    info!("shutdown signal received");
}
