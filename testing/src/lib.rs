//! # Storefront Testing
//!
//! Testing utilities and helpers for the storefront reservation core.
//!
//! This crate provides:
//! - Controllable clocks ([`FixedClock`], [`MockClock`])
//! - [`InMemoryLedger`]: a TTL-aware ledger with expiry notifications
//! - [`FaultyLedger`]: wraps a ledger and fails chosen operations on demand
//! - [`InMemoryStockStore`] and [`InMemorySearchIndex`]
//! - Property-test strategies for cart operation sequences
//!
//! ## Example
//!
//! ```
//! use storefront_testing::{InMemoryLedger, MockClock};
//! use std::sync::Arc;
//!
//! let clock = MockClock::default();
//! let ledger = InMemoryLedger::with_clock(Arc::new(clock.clone()));
//! assert!(ledger.is_empty());
//! ```

use chrono::{DateTime, Utc};
use storefront_core::environment::Clock;

pub mod faulty;
pub mod ledger;
pub mod stores;

pub use faulty::{FaultyLedger, LedgerOp};
pub use ledger::InMemoryLedger;
pub use stores::{InMemorySearchIndex, InMemoryStockStore};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use storefront_testing::mocks::FixedClock;
    /// use storefront_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hand one clone to a ledger
    /// and keep another to advance past TTLs.
    #[derive(Debug, Clone)]
    pub struct MockClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl MockClock {
        /// Create a clock starting at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new(test_clock().now())
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

/// Test helpers and utilities
pub mod helpers {
    use std::future::Future;
    use std::time::Duration;

    /// Install a fmt subscriber honouring `RUST_LOG`, once per test binary.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Poll `condition` until it returns `true` or `timeout` elapses.
    ///
    /// # Returns
    ///
    /// Whether the condition became true in time.
    pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// One shopper action against a single product.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum CartOp {
        /// Add `quantity` units for `user`
        Add {
            /// Shopper index
            user: u64,
            /// Units to add
            quantity: u32,
        },
        /// Set the cart quantity for `user`
        Update {
            /// Shopper index
            user: u64,
            /// New quantity
            quantity: u32,
        },
        /// Remove the line for `user`
        Delete {
            /// Shopper index
            user: u64,
        },
        /// Let the line for `user` expire, re-add `quantity` before the
        /// expiry is handled, then handle it
        ExpireAndReadd {
            /// Shopper index
            user: u64,
            /// Units added after expiry
            quantity: u32,
        },
    }

    /// Strategy producing cart operations for up to `users` shoppers.
    pub fn cart_op(users: u64, max_quantity: u32) -> impl Strategy<Value = CartOp> {
        prop_oneof![
            (0..users, 1..=max_quantity).prop_map(|(user, quantity)| CartOp::Add { user, quantity }),
            (0..users, 0..=max_quantity)
                .prop_map(|(user, quantity)| CartOp::Update { user, quantity }),
            (0..users).prop_map(|user| CartOp::Delete { user }),
            (0..users, 1..=max_quantity)
                .prop_map(|(user, quantity)| CartOp::ExpireAndReadd { user, quantity }),
        ]
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, MockClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_mock_clock_advances_all_clones() {
        let clock = MockClock::default();
        let shared = clock.clone();
        let start = clock.now();

        shared.advance(chrono::Duration::seconds(30));

        assert_eq!(clock.now() - start, chrono::Duration::seconds(30));
    }
}
