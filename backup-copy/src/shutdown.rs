//! Cancellation on SIGINT and SIGTERM.
//!
//! A signal cancels the run's [`CancellationToken`]: the orchestrator stops
//! before the next job and the in-flight transfer is killed. A second
//! signal is not handled specially; the process still exits once the
//! partial summary has been delivered.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` on the first SIGINT or SIGTERM.
///
/// Returns without cancelling if no handler could be installed.
pub async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), stopping after the current job");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping after the current job");
        }
        _ = token.cancelled() => return,
    }

    token.cancel();
}

/// Spawn [`cancel_on_signal`] and return the token it cancels.
pub fn install() -> CancellationToken {
    let token = CancellationToken::new();
    tokio::spawn(cancel_on_signal(token.clone()));
    token
}
