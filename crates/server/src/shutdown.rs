//! Graceful shutdown signal handling.
//!
//! Produces a future that resolves when the server should begin shutting
//! down, for `axum::serve().with_graceful_shutdown()`. On Unix both
//! SIGINT (Ctrl+C) and SIGTERM are honored.

/// Returns a future that resolves when an OS shutdown signal is received.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for SIGINT: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
            }
        }
    };

    #[cfg(unix)]
    {
        tokio::select! {
            () = ctrl_c => {
                tracing::info!("Received SIGINT, shutting down");
            }
            () = terminate => {
                tracing::info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        tracing::info!("Received Ctrl+C, shutting down");
    }
}
