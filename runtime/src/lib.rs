//! # Storefront Runtime
//!
//! The reservation core's services, generic over the backends declared in
//! [`storefront_core::providers`]:
//!
//! - [`InventoryService`]: the inventory reservation engine (scarce mode, slot pools)
//! - [`CartService`]: the cart orchestrator (add, update, delete, list, clear)
//! - [`ExpiryReconciler`]: the background task freeing slots of expired cart lines
//! - [`retry`]: exponential backoff
//! - [`metrics`]: Prometheus counters and the scrape endpoint
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use storefront_core::{CartResponse, ProductId, UserId};
//! use storefront_runtime::{CartService, InventoryService, ReservationConfig};
//! use storefront_testing::{InMemoryLedger, InMemorySearchIndex, InMemoryStockStore};
//!
//! # async fn example() {
//! let stock = Arc::new(InMemoryStockStore::new());
//! stock.set_stock(ProductId(1), 4);
//!
//! let inventory = InventoryService::new(Arc::new(InMemoryLedger::new()), ReservationConfig::default());
//! let carts = CartService::new(inventory, stock, Arc::new(InMemorySearchIndex::new()));
//!
//! let response = CartResponse::from(carts.add_to_cart(UserId(7), ProductId(1), 2).await);
//! assert!(response.is_success);
//! # }
//! ```

pub mod cart;
pub mod inventory;
pub mod metrics;
pub mod reconciler;
pub mod retry;

pub use cart::CartService;
pub use inventory::{DEFAULT_CART_TTL, DEFAULT_SCARCITY_THRESHOLD, InventoryService, ReservationConfig};
pub use reconciler::{ExpiryAction, ExpiryReconciler, ReconcilerConfig};
pub use retry::{Backoff, RetryPolicy};
