//! OS signal handling.
//!
//! SIGINT (Ctrl+C) and, on unix, SIGTERM trigger graceful shutdown.

use std::sync::Arc;

use crate::lifecycle::Shutdown;

/// Wait for a termination signal.
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
            _ = term.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| "SIGINT")
    }
}

/// Trigger `shutdown` on the first termination signal.
pub fn spawn_signal_listener(shutdown: Arc<Shutdown>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => {
                tracing::info!(signal, "Shutdown signal received");
                shutdown.trigger();
            }
            Err(e) => tracing::error!(error = %e, "Failed to install signal handler"),
        }
    })
}
