//! SIGINT/SIGTERM handling.
//!
//! A signal does not kill the harness: it cancels a token, the running tool is
//! stopped, and the run still goes through restoration before exiting.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown coordinator
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled once a signal arrives.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for SIGINT or SIGTERM, then cancel the token.
    pub async fn wait_for_signal(&self) {
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
                info!("Received SIGINT (Ctrl+C), stopping and restoring the manifest...");
            }
            _ = terminate => {
                info!("Received SIGTERM, stopping and restoring the manifest...");
            }
            _ = self.token.cancelled() => return,
        }

        self.token.cancel();
    }

    /// Listen for signals in the background for the rest of the run.
    pub fn listen(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.wait_for_signal().await })
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_listener_exits_when_token_cancelled() {
        let coordinator = ShutdownCoordinator::new();
        let handle = coordinator.listen();

        coordinator.token().cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener did not stop")
            .unwrap();
        assert!(coordinator.token().is_cancelled());
    }
}
