//! OS signal handling for graceful shutdown.

use tracing::info;

/// Resolve once SIGTERM or SIGINT arrives.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!(target: "disklog::shutdown", "SIGTERM received, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            info!(target: "disklog::shutdown", "SIGINT received, initiating graceful shutdown");
        }
    }

    Ok(())
}

/// Resolve once Ctrl+C arrives.
#[cfg(windows)]
pub async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!(target: "disklog::shutdown", "Ctrl+C received, initiating graceful shutdown");
    Ok(())
}
