//! Graceful shutdown: stop accepting, close WebSocket clients, drain the
//! orchestrator within the grace period, and flush memory saves.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::AppState;

/// Resolve when SIGINT or SIGTERM arrives.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received"),
        _ = terminate => info!("SIGTERM received"),
    }
}

/// Run the shutdown sequence. Called after the server has stopped
/// accepting new connections.
pub async fn run_graceful(state: &Arc<AppState>) {
    state.ready.store(false, Ordering::Release);
    // WebSocket connections watch this token and close themselves.
    state.shutdown.cancel();

    let grace = Duration::from_millis(state.config.gateway.shutdown_grace_ms);
    if tokio::time::timeout(grace, state.orchestrator.shutdown())
        .await
        .is_err()
    {
        warn!(
            grace_ms = grace.as_millis() as u64,
            "grace period expired with work still in flight"
        );
    }

    state.memory.shutdown().await;
    info!("shutdown complete");
}
