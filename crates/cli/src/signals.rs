//! Signal handling for a clean stop between revisions.
//!
//! SIGINT (Ctrl+C) and SIGTERM set the migration's shutdown flag. The
//! revision being exported is finished, the sinks are checkpointed and the
//! run reports where the next one continues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

/// Wait for a shutdown signal (SIGTERM, SIGINT, or Ctrl+C).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
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
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("received SIGTERM");
        }
    }
}

/// Set `flag` once a shutdown signal arrives.
pub fn forward_shutdown(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        wait_for_shutdown().await;
        warn!("stopping after the current revision");
        flag.store(true, Ordering::SeqCst);
    });
}
