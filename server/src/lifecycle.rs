//! Application lifecycle management and graceful shutdown.
//!
//! [`Application`] owns the wired cart service and the expiry reconciler:
//!
//! 1. **Startup**: spawn the reconciler
//! 2. **Runtime**: serve until the shutdown future resolves
//! 3. **Shutdown**: broadcast the signal and wait for the reconciler, bounded
//!    by the configured timeout

use std::future::Future;
use std::time::Duration;
use storefront_core::providers::{ReservationLedger, SearchIndex, StockStore};
use storefront_runtime::{CartService, ExpiryReconciler, ReconcilerConfig};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Running application with its background tasks.
pub struct Application<L, S, I> {
    carts: CartService<L, S, I>,
    reconciler_config: ReconcilerConfig,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

/// How the reconciler task ended during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Stopped within the timeout
    Graceful,
    /// Task panicked or was cancelled
    Failed,
    /// Still running when the timeout elapsed
    TimedOut,
}

impl<L, S, I> Application<L, S, I>
where
    L: ReservationLedger + 'static,
    S: StockStore,
    I: SearchIndex,
{
    /// Create a new application instance.
    #[must_use]
    pub fn new(carts: CartService<L, S, I>, reconciler_config: ReconcilerConfig, shutdown_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            carts,
            reconciler_config,
            shutdown_tx,
            shutdown_timeout,
        }
    }

    /// Cart service for request handlers.
    #[must_use]
    pub const fn carts(&self) -> &CartService<L, S, I> {
        &self.carts
    }

    /// Run until `shutdown` resolves, then stop background tasks.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> ShutdownOutcome {
        let reconciler = ExpiryReconciler::new(
            self.carts.inventory().clone(),
            self.reconciler_config,
            self.shutdown_tx.subscribe(),
        );
        info!("Starting expiry reconciler");
        let handle = reconciler.spawn();

        shutdown.await;
        info!("Shutdown requested, stopping background tasks...");

        // No receivers left means the reconciler already exited.
        let _ = self.shutdown_tx.send(());

        let outcome = await_shutdown(handle, self.shutdown_timeout).await;
        if outcome == ShutdownOutcome::Graceful {
            info!("Graceful shutdown complete");
        } else {
            warn!(?outcome, "Shutdown finished without stopping the reconciler cleanly");
        }
        outcome
    }
}

async fn await_shutdown(handle: JoinHandle<()>, timeout: Duration) -> ShutdownOutcome {
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(())) => {
            info!("Expiry reconciler stopped gracefully");
            ShutdownOutcome::Graceful
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Expiry reconciler task failed");
            ShutdownOutcome::Failed
        }
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "Expiry reconciler shutdown timed out");
            ShutdownOutcome::TimedOut
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// Returns when the process receives SIGINT (Ctrl+C) or SIGTERM. If a handler
/// cannot be installed, that source is ignored and the other still applies.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finished_task_is_graceful() {
        let handle = tokio::spawn(async {});
        assert_eq!(await_shutdown(handle, Duration::from_secs(1)).await, ShutdownOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_stuck_task_times_out() {
        let handle = tokio::spawn(std::future::pending::<()>());
        assert_eq!(await_shutdown(handle, Duration::from_millis(10)).await, ShutdownOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_aborted_task_fails() {
        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        assert_eq!(await_shutdown(handle, Duration::from_secs(1)).await, ShutdownOutcome::Failed);
    }
}
