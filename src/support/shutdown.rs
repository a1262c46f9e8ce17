//! Graceful shutdown handling
//!
//! A cloneable [`ShutdownSignal`] is handed to every long-lived task (accept
//! loop, connection loops, reconnect supervisor). Triggering it once stops
//! them all; tasks that start waiting afterwards return at once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct ShutdownSignal {
    flag: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self { flag: Arc::new(flag) }
    }

    pub fn is_triggered(&self) -> bool {
        *self.flag.borrow()
    }

    pub fn trigger(&self) {
        let newly = self.flag.send_if_modified(|triggered| !std::mem::replace(triggered, true));
        if newly {
            info!("🛑 Shutdown signal triggered");
        }
    }

    pub async fn wait(&self) {
        self.notified().wait().await
    }

    /// A waiter bound to the signal now, to be awaited later.
    pub fn notified(&self) -> ShutdownNotified {
        ShutdownNotified {
            receiver: self.flag.subscribe(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ShutdownNotified {
    receiver: watch::Receiver<bool>,
}

impl ShutdownNotified {
    pub async fn wait(mut self) {
        // The sender lives as long as any ShutdownSignal clone, so an error
        // here only happens when nobody can trigger anymore.
        let _ = self.receiver.wait_for(|triggered| *triggered).await;
    }
}

/// Resolve on SIGTERM or SIGINT (Ctrl+C elsewhere), then trigger `shutdown`.
pub async fn listen_for_shutdown_signals(shutdown: ShutdownSignal) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut terminate, mut interrupt) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Failed to install signal handlers");
                    return;
                }
            };

        let name = tokio::select! {
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
        };
        info!(signal = name, "📡 Received shutdown signal");
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }
        info!(signal = "ctrl_c", "📡 Received shutdown signal");
    }

    shutdown.trigger();
}

/// Ties OS signals to a [`ShutdownSignal`] and bounds the cleanup that
/// follows.
pub struct ShutdownCoordinator {
    signal: ShutdownSignal,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            signal: ShutdownSignal::new(),
            timeout,
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn start_signal_listener(&self) {
        tokio::spawn(listen_for_shutdown_signals(self.signal.clone()));
    }

    /// Wait for the signal, then run `cleanup` within the timeout.
    /// Returns `false` when cleanup did not finish in time.
    pub async fn shutdown_with_cleanup<F, Fut>(&self, cleanup: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        self.signal.wait().await;
        let timeout_secs = self.timeout.as_secs();
        info!(timeout_secs, "⏳ Starting graceful shutdown");

        let finished = tokio::time::timeout(self.timeout, cleanup()).await.is_ok();
        if finished {
            info!("✅ Graceful shutdown completed");
        } else {
            warn!(timeout_secs, "⚠️ Graceful shutdown timed out");
        }
        finished
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waiters_created_before_the_trigger_wake_up() {
        let signal = ShutdownSignal::new();
        let notified = signal.notified();
        let waiter = tokio::spawn(notified.wait());
        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn late_waiters_return_immediately() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        signal.trigger();
        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), clone.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cleanup_is_bounded_by_the_timeout() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        coordinator.signal().trigger();
        let finished = coordinator
            .shutdown_with_cleanup(|| tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(!finished);

        let finished = coordinator.shutdown_with_cleanup(|| async {}).await;
        assert!(finished);
    }
}
