//! Fault injection for ledger-backed tests.
//!
//! [`FaultyLedger`] forwards to an inner ledger until told to fail a given
//! operation, which then returns a connection error without touching the
//! inner ledger. Used to exercise the `ServiceUnavailable` paths and the
//! reconciler's resubscribe loop.

use storefront_core::error::LedgerError;
use storefront_core::providers::{ClearOutcome, ExpiryStream, ReservationLedger};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A ledger operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    /// Single-field hash write
    SetField,
    /// Single-field hash read
    GetField,
    /// Whole-hash read
    GetAllFields,
    /// Key deletion
    DeleteKey,
    /// Existence check
    KeyExists,
    /// String write with TTL
    SetWithTtl,
    /// String read
    GetValue,
    /// Atomic increment with TTL
    IncrementWithTtl,
    /// Prefix scan
    KeysWithPrefix,
    /// Pool creation
    InitFields,
    /// Slot claim
    ClaimFields,
    /// Slot release
    ClearFields,
    /// Expiry subscription
    Subscribe,
}

/// Ledger wrapper that fails selected operations on demand.
#[derive(Debug, Clone)]
pub struct FaultyLedger<L> {
    inner: L,
    failing: Arc<Mutex<HashSet<LedgerOp>>>,
    subscribe_failures: Arc<AtomicUsize>,
}

impl<L> FaultyLedger<L> {
    /// Wrap `inner` with no faults enabled.
    #[must_use]
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            failing: Arc::new(Mutex::new(HashSet::new())),
            subscribe_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The wrapped ledger.
    #[must_use]
    pub const fn inner(&self) -> &L {
        &self.inner
    }

    /// Make `op` fail until [`heal`](Self::heal) is called.
    pub fn fail(&self, op: LedgerOp) {
        self.failing.lock().unwrap_or_else(PoisonError::into_inner).insert(op);
    }

    /// Let `op` reach the inner ledger again.
    pub fn heal(&self, op: LedgerOp) {
        self.failing.lock().unwrap_or_else(PoisonError::into_inner).remove(&op);
    }

    /// Number of subscription attempts rejected so far.
    #[must_use]
    pub fn subscribe_failures(&self) -> usize {
        self.subscribe_failures.load(Ordering::SeqCst)
    }

    fn check(&self, op: LedgerOp) -> Result<(), LedgerError> {
        let failing = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
        if failing.contains(&op) {
            if op == LedgerOp::Subscribe {
                self.subscribe_failures.fetch_add(1, Ordering::SeqCst);
            }
            return Err(LedgerError::Connection("injected failure".to_string()));
        }
        Ok(())
    }
}

impl<L: ReservationLedger> ReservationLedger for FaultyLedger<L> {
    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), LedgerError> {
        self.check(LedgerOp::SetField)?;
        self.inner.set_field(key, field, value).await
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, LedgerError> {
        self.check(LedgerOp::GetField)?;
        self.inner.get_field(key, field).await
    }

    async fn get_all_fields(&self, key: &str) -> Result<HashMap<String, String>, LedgerError> {
        self.check(LedgerOp::GetAllFields)?;
        self.inner.get_all_fields(key).await
    }

    async fn delete_key(&self, key: &str) -> Result<bool, LedgerError> {
        self.check(LedgerOp::DeleteKey)?;
        self.inner.delete_key(key).await
    }

    async fn key_exists(&self, key: &str) -> Result<bool, LedgerError> {
        self.check(LedgerOp::KeyExists)?;
        self.inner.key_exists(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LedgerError> {
        self.check(LedgerOp::SetWithTtl)?;
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, LedgerError> {
        self.check(LedgerOp::GetValue)?;
        self.inner.get_value(key).await
    }

    async fn increment_with_ttl(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, LedgerError> {
        self.check(LedgerOp::IncrementWithTtl)?;
        self.inner.increment_with_ttl(key, delta, ttl).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, LedgerError> {
        self.check(LedgerOp::KeysWithPrefix)?;
        self.inner.keys_with_prefix(prefix).await
    }

    async fn init_fields(&self, key: &str, fields: &[String], value: &str) -> Result<bool, LedgerError> {
        self.check(LedgerOp::InitFields)?;
        self.inner.init_fields(key, fields, value).await
    }

    async fn claim_fields(&self, key: &str, count: usize, value: &str) -> Result<Option<Vec<String>>, LedgerError> {
        self.check(LedgerOp::ClaimFields)?;
        self.inner.claim_fields(key, count, value).await
    }

    async fn clear_fields(&self, key: &str, value: &str, exact: Option<usize>) -> Result<ClearOutcome, LedgerError> {
        self.check(LedgerOp::ClearFields)?;
        self.inner.clear_fields(key, value, exact).await
    }

    async fn subscribe_expiry_events(&self) -> Result<ExpiryStream, LedgerError> {
        self.check(LedgerOp::Subscribe)?;
        self.inner.subscribe_expiry_events().await
    }
}
