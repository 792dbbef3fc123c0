use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio_util::sync::CancellationToken;

/// One-shot cancellation capability threaded through every subsystem.
///
/// `stop` is the graceful path (signals, operator intent); `fail` marks the
/// shutdown as fatal — lost lease, dead watch, unrecoverable store error —
/// so the process exits non-zero under its supervisor.
#[derive(Clone)]
pub struct Shutdown {
    token: CancellationToken,
    fatal: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            fatal: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn fail(&self, reason: &str) {
        tracing::error!(reason, "fatal error, shutting down");
        self.fatal.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancel `shutdown` when the process receives SIGINT or SIGTERM, so
/// container orchestrators get a clean deregistration instead of waiting
/// out the lease TTL.
pub fn spawn_signal_handler(shutdown: Shutdown) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to install Ctrl+C handler");
            }
        };

        #[cfg(unix)]
        let sigterm = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
            }
        };
        #[cfg(not(unix))]
        let sigterm = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm => {}
        }
        tracing::info!("shutdown signal received");
        shutdown.stop();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_cancels_without_fatality() {
        let s = Shutdown::new();
        s.stop();
        s.cancelled().await;
        assert!(!s.is_fatal());
    }

    #[tokio::test]
    async fn fail_cancels_and_marks_fatal() {
        let s = Shutdown::new();
        let watcher = s.clone();
        s.fail("lease lost");
        watcher.cancelled().await;
        assert!(watcher.is_fatal());
    }
}
