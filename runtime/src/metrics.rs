//! Prometheus metrics for the reservation core.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `storefront_reservations_total{status}` - Slot claims by outcome (reserved, insufficient, failed)
//! - `storefront_slots_released_total{reason}` - Slots freed (removed, downsized, expired, cleared)
//! - `storefront_pools_created_total` - Products switched into scarce mode
//! - `storefront_cart_operations_total{operation,status}` - Cart mutations by outcome
//! - `storefront_expiry_events_total{status}` - Expiry notifications handled by the reconciler
//!
//! ## Gauges
//! - `storefront_reconciler_subscribed` - 1 while the reconciler holds a live subscription
//!
//! # Example
//!
//! ```rust,no_run
//! use storefront_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
#[derive(Debug, Clone)]
pub struct MetricsServer {
    addr: SocketAddr,
    started: bool,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, started: false }
    }

    /// Address the scrape endpoint listens on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether [`start`](Self::start) installed the exporter.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// Register metric descriptions and install the exporter with its HTTP listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be installed. An already installed
    /// recorder is logged and tolerated.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        match PrometheusBuilder::new().with_http_listener(self.addr).install() {
            Ok(()) => {
                self.started = true;
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }
}

/// Register all metric descriptions. Called once by [`MetricsServer::start`].
fn register_metrics() {
    describe_counter!(
        "storefront_reservations_total",
        "Slot reservation attempts by status (reserved, insufficient, failed)"
    );
    describe_counter!(
        "storefront_slots_released_total",
        "Reservation slots freed by reason (removed, downsized, expired, cleared)"
    );
    describe_counter!(
        "storefront_pools_created_total",
        "Reservation pools created when a product entered scarce mode"
    );
    describe_counter!(
        "storefront_cart_operations_total",
        "Cart operations by operation and status"
    );
    describe_counter!(
        "storefront_expiry_events_total",
        "Cart line expiry notifications by status (released, skipped, ignored, failed)"
    );
    describe_gauge!(
        "storefront_reconciler_subscribed",
        "1 while the expiry reconciler holds a live subscription"
    );
}

/// Reservation engine metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record a reservation attempt.
    pub fn record_reserve(status: &'static str) {
        counter!("storefront_reservations_total", "status" => status).increment(1);
    }

    /// Record freed slots.
    pub fn record_released(reason: &'static str, slots: usize) {
        if slots > 0 {
            counter!("storefront_slots_released_total", "reason" => reason)
                .increment(u64::try_from(slots).unwrap_or(u64::MAX));
        }
    }

    /// Record a newly created pool.
    pub fn record_pool_created() {
        counter!("storefront_pools_created_total").increment(1);
    }
}

/// Cart orchestrator metrics recorder.
pub struct CartMetrics;

impl CartMetrics {
    /// Record the outcome of a cart operation.
    pub fn record<T>(operation: &'static str, result: &storefront_core::Result<T>) {
        let status = match result {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        counter!(
            "storefront_cart_operations_total",
            "operation" => operation,
            "status" => status
        )
        .increment(1);
    }
}

/// Expiry reconciler metrics recorder.
pub struct ExpiryMetrics;

impl ExpiryMetrics {
    /// Record a handled expiry notification.
    pub fn record_event(status: &'static str) {
        counter!("storefront_expiry_events_total", "status" => status).increment(1);
    }

    /// Record whether the reconciler is subscribed.
    pub fn record_subscribed(subscribed: bool) {
        gauge!("storefront_reconciler_subscribed").set(if subscribed { 1.0 } else { 0.0 });
    }
}
