//! # Storefront Core
//!
//! Domain types and collaborator interfaces for the storefront reservation core.
//!
//! The reservation core keeps scarce products from being oversold while many
//! shoppers add them to carts concurrently. This crate holds everything the
//! engine, the cart orchestrator and the backends agree on:
//!
//! - **Types**: `UserId`, `ProductId`, `SlotIndex`, cart lines and cart items
//! - **Errors**: the reservation failure taxonomy and backend error types
//! - **Providers**: `ReservationLedger`, `StockStore`, `SearchIndex`
//! - **Keys**: the ledger key scheme shared by every ledger backend
//! - **Environment**: the injectable `Clock`
//!
//! ## Example
//!
//! ```
//! use storefront_core::keys::{cart_line_key, parse_cart_line_key};
//! use storefront_core::types::{ProductId, UserId};
//!
//! let key = cart_line_key(UserId(7), ProductId(42));
//! assert_eq!(key, "cart:7:42");
//! assert_eq!(parse_cart_line_key(&key), Some((UserId(7), ProductId(42))));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod error;
pub mod keys;
pub mod outcome;
pub mod providers;
pub mod types;

pub use error::{LedgerError, ReservationError, Result, SearchIndexError, StockStoreError};
pub use outcome::{CartOutcome, CartResponse};
pub use types::{CartItem, CartLine, PoolStatus, ProductDocument, ProductId, SlotIndex, StockSummary, UserId};

/// Environment module - Traits for dependency injection
///
/// All time-dependent behavior (ledger TTLs in the in-memory backend, retry
/// bookkeeping) reads the time through [`Clock`](environment::Clock) so tests
/// can control it.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use storefront_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
