//! Process shutdown on SIGTERM / SIGINT (Ctrl+C on Windows).
//!
//! One [`CancellationToken`] is shared by the HTTP server and the
//! transaction engine, so a signal stops new requests and resolves every
//! outstanding confirmation watcher.

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

/// Cancels its token when the process is asked to stop.
#[derive(Debug)]
pub struct Shutdown {
    task_tracker: TaskTracker,
    token: CancellationToken,
}

impl Shutdown {
    /// Register the signal handlers and spawn the listener.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if signal registration fails.
    #[allow(clippy::unnecessary_wraps)]
    pub fn listen() -> Result<Self, std::io::Error> {
        let token = CancellationToken::new();
        let inner = token.clone();
        let task_tracker = TaskTracker::new();

        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            task_tracker.spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
                    _ = sigint.recv() => info!("SIGINT received, shutting down"),
                    () = inner.cancelled() => {},
                }
                inner.cancel();
            });
        }

        #[cfg(windows)]
        {
            task_tracker.spawn(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Ctrl+C received, shutting down"),
                    () = inner.cancelled() => {},
                }
                inner.cancel();
            });
        }

        task_tracker.close();
        Ok(Self {
            task_tracker,
            token,
        })
    }

    /// Token to hand to subsystems.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait until shutdown is requested and the listener has exited.
    pub async fn recv(&self) {
        self.token.cancelled().await;
        self.task_tracker.wait().await;
    }
}
