//! Expiry reconciler.
//!
//! Listens for expired cart line keys and frees the slots their owners held.
//! Runs as a supervised background task:
//!
//! ```text
//! loop {
//!     subscribe (backoff on failure)
//!         for each expired key:
//!             cart:{user}:{product}? → release(user, product)
//!         stream ended → resubscribe
//! } until shutdown
//! ```
//!
//! Per-event failures are logged and never stop the loop.

use crate::inventory::{InventoryService, ReleaseReason};
use crate::metrics::ExpiryMetrics;
use crate::retry::{Backoff, RetryPolicy};
use futures::StreamExt;
use std::time::Duration;
use storefront_core::keys::{cart_line_key, parse_cart_line_key};
use storefront_core::providers::{ExpiryStream, ReservationLedger};
use storefront_core::{ProductId, Result, UserId};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What the reconciler did with one expiry notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryAction {
    /// Slots were freed (possibly zero when the product is not scarce)
    Released {
        /// Number of slots freed
        slots: usize,
    },
    /// The cart line was re-created before the notification was handled and
    /// its slots already match its quantity
    Skipped,
    /// The key is not a cart line
    Ignored,
}

/// Reconciler tunables.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Name used in log lines
    pub name: String,
    /// Backoff between subscription attempts
    pub retry: RetryPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            name: "expiry-reconciler".to_string(),
            retry: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(500))
                .max_delay(Duration::from_secs(30))
                .multiplier(2.0)
                .build(),
        }
    }
}

impl ReconcilerConfig {
    /// Set the log name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the resubscribe backoff.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Background listener that frees slots of expired cart lines.
pub struct ExpiryReconciler<L> {
    inventory: InventoryService<L>,
    config: ReconcilerConfig,
    shutdown: broadcast::Receiver<()>,
}

impl<L> std::fmt::Debug for ExpiryReconciler<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiryReconciler")
            .field("name", &self.config.name)
            .finish_non_exhaustive()
    }
}

impl<L> ExpiryReconciler<L>
where
    L: ReservationLedger + 'static,
{
    /// Create a reconciler that stops when `shutdown` fires.
    #[must_use]
    pub const fn new(
        inventory: InventoryService<L>,
        config: ReconcilerConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            inventory,
            config,
            shutdown,
        }
    }

    /// Spawn the reconciler as a background task.
    ///
    /// The task runs until the shutdown signal is received (or its sender is
    /// dropped).
    #[must_use]
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Handle a single expired key.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::ServiceUnavailable`](storefront_core::ReservationError::ServiceUnavailable)
    /// if the ledger cannot be read or written.
    pub async fn handle_expired(&self, key: &str) -> Result<ExpiryAction> {
        let Some((user_id, product_id)) = parse_cart_line_key(key) else {
            debug!(reconciler = %self.config.name, key, "Ignoring non cart line key");
            return Ok(ExpiryAction::Ignored);
        };
        self.reconcile(user_id, product_id).await
    }

    async fn reconcile(&self, user_id: UserId, product_id: ProductId) -> Result<ExpiryAction> {
        let key = cart_line_key(user_id, product_id);
        if let Some(raw) = self.inventory.ledger().get_value(&key).await? {
            return self.trim_recreated(user_id, product_id, &key, &raw).await;
        }

        let slots = self
            .inventory
            .release_for(user_id, product_id, ReleaseReason::Expired)
            .await?;
        if slots > 0 {
            info!(
                reconciler = %self.config.name,
                user_id = %user_id,
                product_id = %product_id,
                slots,
                "Released slots of expired cart line"
            );
        }
        Ok(ExpiryAction::Released { slots })
    }

    /// The line was re-added before its expiry was handled: keep the slots
    /// backing the new line and free what the expired one left behind.
    async fn trim_recreated(&self, user_id: UserId, product_id: ProductId, key: &str, raw: &str) -> Result<ExpiryAction> {
        let Ok(quantity) = raw.parse::<u32>() else {
            warn!(reconciler = %self.config.name, key, value = raw, "Malformed re-created cart line, keeping slots");
            return Ok(ExpiryAction::Skipped);
        };

        let slots = self
            .inventory
            .release_surplus(user_id, product_id, quantity, ReleaseReason::Expired)
            .await?;
        if slots == 0 {
            debug!(
                reconciler = %self.config.name,
                user_id = %user_id,
                product_id = %product_id,
                "Cart line re-created before expiry was handled, keeping slots"
            );
            return Ok(ExpiryAction::Skipped);
        }

        info!(
            reconciler = %self.config.name,
            user_id = %user_id,
            product_id = %product_id,
            slots,
            kept = quantity,
            "Released slots left by expired cart line"
        );
        Ok(ExpiryAction::Released { slots })
    }

    async fn run(&mut self) {
        info!(reconciler = %self.config.name, "Expiry reconciler started");
        let mut backoff = self.config.retry.backoff();

        loop {
            let subscription = tokio::select! {
                _ = self.shutdown.recv() => break,
                result = self.inventory.ledger().subscribe_expiry_events() => result,
            };

            let delay = match subscription {
                Ok(mut stream) => {
                    backoff.reset();
                    ExpiryMetrics::record_subscribed(true);
                    info!(reconciler = %self.config.name, "Subscribed to expiry notifications");

                    let stopped = self.process_stream(&mut stream).await;
                    ExpiryMetrics::record_subscribed(false);
                    if stopped {
                        break;
                    }

                    let delay = backoff.next_delay();
                    warn!(
                        reconciler = %self.config.name,
                        delay_ms = delay.as_millis(),
                        "Expiry stream ended, resubscribing"
                    );
                    delay
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    error!(
                        reconciler = %self.config.name,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Failed to subscribe to expiry notifications"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!(reconciler = %self.config.name, "Expiry reconciler stopped");
    }

    /// Drain `stream` until it ends (`false`) or shutdown is signalled (`true`).
    async fn process_stream(&mut self, stream: &mut ExpiryStream) -> bool {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => return true,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(key)) => match self.handle_expired(&key).await {
                    Ok(ExpiryAction::Released { .. }) => ExpiryMetrics::record_event("released"),
                    Ok(ExpiryAction::Skipped) => ExpiryMetrics::record_event("skipped"),
                    Ok(ExpiryAction::Ignored) => ExpiryMetrics::record_event("ignored"),
                    Err(e) => {
                        ExpiryMetrics::record_event("failed");
                        error!(reconciler = %self.config.name, key = %key, error = %e, "Failed to reconcile expired key");
                    }
                },
                Some(Err(e)) => {
                    ExpiryMetrics::record_event("failed");
                    error!(reconciler = %self.config.name, error = %e, "Error receiving expiry notification");
                }
                None => return false,
            }
        }
    }
}
