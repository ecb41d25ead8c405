//! Signal handling for graceful shutdown.

use tracing::{info, warn};

/// Wait for a shutdown signal (SIGINT, SIGTERM, or SIGQUIT on Unix).
///
/// Falls back to Ctrl-C alone if the Unix handlers cannot be installed.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = (|| {
        Ok::<_, std::io::Error>((
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
            signal(SignalKind::quit())?,
        ))
    })();

    let (mut sigint, mut sigterm, mut sigquit) = match handlers {
        Ok(handlers) => handlers,
        Err(e) => {
            warn!("Failed to install signal handlers, listening for Ctrl-C only: {}", e);
            ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => {
            info!(message = "Signal received.", signal = "SIGINT");
        }
        _ = sigterm.recv() => {
            info!(message = "Signal received.", signal = "SIGTERM");
        }
        _ = sigquit.recv() => {
            info!(message = "Signal received.", signal = "SIGQUIT");
        }
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(message = "Signal received.", signal = "ctrl-c"),
        Err(e) => {
            warn!("Failed to listen for Ctrl-C, shutdown only on source exhaustion: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_cancellation_propagates_through_clones() {
        let original = CancellationToken::new();
        let ingest = original.clone();
        let batching = ingest.clone();

        assert!(!batching.is_cancelled());
        original.cancel();
        assert!(ingest.is_cancelled());
        assert!(batching.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_cancellation_is_immediate() {
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_clone.cancelled() => "cancelled",
                _ = tokio::time::sleep(Duration::from_secs(10)) => "timeout",
            }
        });

        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("task should complete quickly")
            .expect("task should not panic");

        assert_eq!(result, "cancelled");
    }
}
