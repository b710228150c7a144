//! Graceful shutdown utilities

use tracing::warn;

/// Wait for a termination signal and report which one arrived.
///
/// On Unix this is Ctrl+C (SIGINT) or SIGTERM, elsewhere Ctrl+C only.
///
/// ```ignore
/// let signal = common::shutdown::wait_for_shutdown().await;
/// info!("Received {}, stopping", signal);
/// ```
pub async fn wait_for_shutdown() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("SIGTERM handler unavailable ({}), only Ctrl+C stops the service", e);
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = async {
                match term_signal {
                    Some(mut sig) => {
                        sig.recv().await;
                    },
                    None => std::future::pending::<()>().await,
                }
            } => "SIGTERM",
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler failed: {}", e);
        }
        "SIGINT"
    }
}
