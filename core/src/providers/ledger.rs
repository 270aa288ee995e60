//! Reservation ledger trait.
//!
//! The ledger is a keyed store with hash fields, per-key TTL, and a stream of
//! expired key names. Single-key commands are atomic. The slot primitives
//! (`init_fields`, `claim_fields`, `clear_fields`) and `increment_with_ttl`
//! must each execute as one atomic step on the backend: the reservation
//! engine relies on them instead of read-then-write sequences.

use crate::error::LedgerError;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Stream of expired key names.
///
/// Items are `Err` when a single notification could not be decoded; the
/// stream ending means the subscription was lost.
pub type ExpiryStream = BoxStream<'static, Result<String, LedgerError>>;

/// Result of an atomic [`ReservationLedger::clear_fields`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// This many fields were reset to empty.
    Cleared(usize),
    /// An exact count was requested but only `held` fields matched; nothing changed.
    Insufficient {
        /// Fields that held the value
        held: usize,
    },
}

/// Reservation ledger.
///
/// # Implementation Notes
///
/// - Keys expire independently; expired keys must be invisible to reads
/// - Expiry notifications carry only the key name
/// - An empty string field value means "free slot"
pub trait ReservationLedger: Send + Sync {
    /// Set a single hash field.
    ///
    /// # Errors
    ///
    /// Returns error if the backend call fails.
    fn set_field(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Read a single hash field.
    ///
    /// # Errors
    ///
    /// Returns error if the backend call fails.
    fn get_field(
        &self,
        key: &str,
        field: &str,
    ) -> impl Future<Output = Result<Option<String>, LedgerError>> + Send;

    /// Read every field of a hash (empty map when the key is absent).
    ///
    /// # Errors
    ///
    /// Returns error if the backend call fails.
    fn get_all_fields(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<HashMap<String, String>, LedgerError>> + Send;

    /// Delete a key of any type.
    ///
    /// # Returns
    ///
    /// `true` if a key was removed.
    ///
    /// # Errors
    ///
    /// Returns error if the backend call fails.
    fn delete_key(&self, key: &str) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Check whether a key exists.
    ///
    /// # Errors
    ///
    /// Returns error if the backend call fails.
    fn key_exists(&self, key: &str) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Store a string value with a TTL, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns error if the backend call fails.
    fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Read a string value.
    ///
    /// # Errors
    ///
    /// Returns error if the backend call fails.
    fn get_value(&self, key: &str)
        -> impl Future<Output = Result<Option<String>, LedgerError>> + Send;

    /// Atomically add `delta` to an integer value and (re)set its TTL.
    ///
    /// A missing key counts as zero.
    ///
    /// # Returns
    ///
    /// The value after the increment.
    ///
    /// # Errors
    ///
    /// Returns error if the backend call fails or the stored value is not an integer.
    fn increment_with_ttl(
        &self,
        key: &str,
        delta: i64,
        ttl: Duration,
    ) -> impl Future<Output = Result<i64, LedgerError>> + Send;

    /// List keys starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns error if the backend call fails.
    fn keys_with_prefix(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<String>, LedgerError>> + Send;

    /// Create a hash with every field set to `value`, only if the key is absent.
    ///
    /// # Returns
    ///
    /// `true` if this call created the hash.
    ///
    /// # Errors
    ///
    /// Returns error if the backend call fails.
    fn init_fields(
        &self,
        key: &str,
        fields: &[String],
        value: &str,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Atomically claim `count` fields whose value is empty by setting them to `value`.
    ///
    /// Claims all `count` fields or none.
    ///
    /// # Returns
    ///
    /// The claimed field names, or `None` if fewer than `count` fields were empty.
    ///
    /// # Errors
    ///
    /// Returns error if the backend call fails.
    fn claim_fields(
        &self,
        key: &str,
        count: usize,
        value: &str,
    ) -> impl Future<Output = Result<Option<Vec<String>>, LedgerError>> + Send;

    /// Atomically reset fields holding `value` back to empty.
    ///
    /// With `exact: None` every matching field is cleared. With
    /// `exact: Some(n)` exactly `n` are cleared, or none if fewer match.
    ///
    /// # Errors
    ///
    /// Returns error if the backend call fails.
    fn clear_fields(
        &self,
        key: &str,
        value: &str,
        exact: Option<usize>,
    ) -> impl Future<Output = Result<ClearOutcome, LedgerError>> + Send;

    /// Subscribe to expired-key notifications.
    ///
    /// # Errors
    ///
    /// Returns error if the subscription cannot be established.
    fn subscribe_expiry_events(&self)
        -> impl Future<Output = Result<ExpiryStream, LedgerError>> + Send;
}
