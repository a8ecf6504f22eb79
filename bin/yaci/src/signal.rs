//! Process shutdown signal handling.

use std::io;

use tokio::signal::ctrl_c;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Spawns a task that cancels `token` once a shutdown signal is received.
///
/// The token is the root cancellation scope of the extraction run; every RPC
/// and every sleep underneath it observes the cancellation cooperatively.
pub fn spawn_shutdown_watcher(token: CancellationToken) {
    tokio::spawn(async move {
        wait_shutdown_signals().await;
        info!(target: "yaci", "Shutdown signal received.");
        token.cancel();
    });
}

/// Waits for an OS shutdown signal to be received - `SIGTERM` (Unix only),
/// `SIGINT`.
async fn wait_shutdown_signals() {
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c() => {},
        _ = sigterm() => {},
    }

    #[cfg(not(unix))]
    tokio::select! {
        _ = ctrl_c() => {},
    }
}

/// Returns a future that can be awaited to wait for the `SIGTERM` signal.
#[cfg(unix)]
async fn sigterm() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}
