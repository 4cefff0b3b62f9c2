//! Operator interruption handling for SIGTERM and SIGINT.
//!
//! Long waits (certificate quorum) take a `CancellationToken`. The watcher
//! here cancels it when the operator interrupts the run or an optional
//! deadline passes; steps already in progress are not interrupted.

use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancels a token on SIGINT, SIGTERM or deadline
pub struct ShutdownWatcher {
    token: CancellationToken,
}

impl ShutdownWatcher {
    /// Start watching. Must be called inside a tokio runtime.
    pub fn spawn(deadline: Option<Duration>) -> Self {
        let token = CancellationToken::new();
        let watched = token.clone();

        tokio::spawn(async move {
            let deadline = async {
                match deadline {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = wait_for_signal() => {}
                _ = deadline => {
                    warn!("Wait deadline reached, cancelling");
                }
                _ = watched.cancelled() => return,
            }
            watched.cancel();
        });

        Self { token }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for ShutdownWatcher {
    fn drop(&mut self) {
        // stops the watcher task
        self.token.cancel();
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
            info!("Received SIGINT (Ctrl+C), cancelling recovery wait...");
        }
        _ = terminate => {
            info!("Received SIGTERM, cancelling recovery wait...");
        }
    }
}
