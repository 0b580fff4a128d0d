//! Graceful shutdown (§5, §9): stop accepting connections, drain owned
//! terminals, and report back how long draining took so `main` can pick
//! the right exit code.

use std::time::Duration;

use tokio::signal;
use tracing::{info, warn};
use tt_registry::TerminalRegistry;

/// Resolves when either SIGINT or SIGTERM arrives. A handler that fails to
/// install logs the failure and falls back to waiting on the other signal
/// instead of panicking the process.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install SIGINT handler");
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
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

/// Runs `cleanupWithGrace(force=false)` against every live terminal and
/// waits up to `deadline` for them all to reach a terminal (non-live)
/// state. Returns `true` if draining completed within the deadline.
pub async fn drain(registry: &TerminalRegistry, deadline: Duration) -> bool {
    registry.cleanup_with_grace(false);

    let poll_interval = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while waited < deadline {
        if registry.active_count() == 0 {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
        waited += poll_interval;
    }
    warn!(
        remaining = registry.active_count(),
        "shutdown deadline elapsed with terminals still draining"
    );
    false
}
