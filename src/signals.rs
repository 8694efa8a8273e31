use tokio::signal;
use tracing::info;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};

/// Resolves when the process is asked to stop.
#[cfg(unix)]
pub async fn handle_stop_signals() {
    let mut sigterm =
        unix_signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("SIGTERM received, exiting gracefully");
        }
        _ = signal::ctrl_c() => {
            info!("Ctrl+C received, exiting");
        }
    }
}

#[cfg(not(unix))]
pub async fn handle_stop_signals() {
    signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    info!("Ctrl+C received, exiting");
}
