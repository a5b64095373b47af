use crate::server::lifecycle::Supervisor;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Exit status after an interrupt, as shells report it.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Stop tracked children when the tool is asked to exit.
///
/// Waits in the background for SIGINT or SIGTERM, stops every child this
/// invocation started without `detached`, then exits the process with
/// status 130. Servers that do not stop within `deadline` are left running.
/// A SIGKILL to the tool bypasses this entirely.
pub fn install_shutdown_hook(supervisor: Arc<Supervisor>, deadline: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_exit_signal().await;
        tracing::warn!("Exit signal received, stopping tracked servers");

        for (name, result) in supervisor.shutdown_tracked(deadline).await {
            match result {
                Ok(_) => tracing::info!(server = %name, "Stopped during shutdown"),
                Err(e) => tracing::error!(server = %name, error = %e, "Failed to stop during shutdown"),
            }
        }

        std::process::exit(INTERRUPTED_EXIT_CODE);
    })
}

#[cfg(unix)]
async fn wait_for_exit_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_exit_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
