//! Shutdown coordination.
//!
//! One [`CancellationToken`] stands for "the pipeline is running".
//! Transports, the relay and the render loop all race their waits
//! against it, so cancelling it once releases everything. `Lifecycle`
//! owns that token plus the handles of every spawned worker and joins
//! them on the way out.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tracks the pipeline's workers and its stop signal.
pub struct Lifecycle {
    cancel: CancellationToken,
    workers: Vec<(String, JoinHandle<()>)>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            workers: Vec::new(),
        }
    }

    /// A handle on the pipeline's cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether shutdown has not been requested yet.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Spawn a named worker that will be joined by [`join`](Self::join).
    pub fn spawn<F>(&mut self, name: impl Into<String>, worker: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!("spawning worker {name}");
        self.workers.push((name, tokio::spawn(worker)));
    }

    /// Spawn a worker that cancels the pipeline on SIGINT / SIGTERM.
    pub fn watch_signals(&mut self) {
        let cancel = self.cancel.clone();
        self.spawn("signals", cancel_on_signal(cancel));
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("shutdown requested");
            self.cancel.cancel();
        }
    }

    /// Cancel (if not done yet) and wait for every worker, aborting
    /// those still running after `grace`.
    pub async fn join(self, grace: Duration) {
        self.shutdown();
        let deadline = Instant::now() + grace;

        for (name, mut handle) in self.workers {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!("worker {name} finished"),
                Ok(Err(e)) if e.is_panic() => error!("worker {name} panicked"),
                Ok(Err(e)) => warn!("worker {name} failed: {e}"),
                Err(_) => {
                    warn!("worker {name} did not stop within {grace:?}; aborting");
                    handle.abort();
                }
            }
        }
        info!("all workers stopped");
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

async fn cancel_on_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        signal = termination_signal() => {
            match signal {
                Ok(name) => info!("{name} received, shutting down"),
                Err(e) => error!("signal handler failed: {e}; shutting down"),
            }
            cancel.cancel();
        }
    }
}

/// Resolve on the first termination signal, returning its name.
pub async fn termination_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r.map(|()| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn join_waits_for_cooperative_workers() {
        let mut lifecycle = Lifecycle::new();
        let stopped = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let token = lifecycle.token();
            let stopped = Arc::clone(&stopped);
            lifecycle.spawn(format!("worker-{i}"), async move {
                token.cancelled().await;
                stopped.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(lifecycle.is_running());

        lifecycle.join(Duration::from_secs(5)).await;
        assert_eq!(stopped.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_worker_is_aborted_after_grace() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.spawn("stuck", std::future::pending());

        let start = Instant::now();
        lifecycle.join(Duration::from_secs(2)).await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn panicking_worker_does_not_break_join() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.spawn("boom", async { panic!("worker exploded") });
        lifecycle.join(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn signal_watcher_exits_on_shutdown() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.watch_signals();
        lifecycle.shutdown();
        assert!(!lifecycle.is_running());
        tokio::time::timeout(Duration::from_secs(5), lifecycle.join(Duration::from_secs(5)))
            .await
            .expect("signal watcher did not stop");
    }
}
