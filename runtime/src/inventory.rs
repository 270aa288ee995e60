//! Inventory reservation engine.
//!
//! Once a product's remaining stock drops to the scarcity threshold, the
//! engine snapshots that stock into a fixed-size pool of slots in the ledger.
//! Every unit a shopper holds in their cart occupies one slot, so the number
//! of units held across all carts can never exceed the snapshot.
//!
//! ```text
//! product:42:inventory
//!   "1" → "7"      (held by user 7)
//!   "2" → "7"
//!   "3" → ""       (free)
//! ```
//!
//! Claiming and freeing slots go through the ledger's atomic primitives, so
//! concurrent shoppers racing for the last slots cannot both win.

use crate::metrics::ReservationMetrics;
use std::sync::Arc;
use std::time::Duration;
use storefront_core::error::LedgerError;
use storefront_core::keys::{EMPTY_OCCUPANT, pool_key};
use storefront_core::providers::{ClearOutcome, ReservationLedger};
use storefront_core::{PoolStatus, ProductId, ReservationError, Result, SlotIndex, UserId};
use tracing::{debug, error, info, warn};

/// Default stock level at or below which a product enters scarce mode.
pub const DEFAULT_SCARCITY_THRESHOLD: u32 = 10;

/// Default lifetime of a cart line between mutations.
pub const DEFAULT_CART_TTL: Duration = Duration::from_secs(15 * 60);

/// Tunables shared by the engine and the cart orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationConfig {
    /// Stock level at or below which a pool is created
    pub scarcity_threshold: u32,
    /// TTL applied to a cart line on every mutation
    pub cart_ttl: Duration,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            scarcity_threshold: DEFAULT_SCARCITY_THRESHOLD,
            cart_ttl: DEFAULT_CART_TTL,
        }
    }
}

impl ReservationConfig {
    /// Set the scarcity threshold.
    #[must_use]
    pub const fn with_scarcity_threshold(mut self, threshold: u32) -> Self {
        self.scarcity_threshold = threshold;
        self
    }

    /// Set the cart line TTL.
    #[must_use]
    pub const fn with_cart_ttl(mut self, ttl: Duration) -> Self {
        self.cart_ttl = ttl;
        self
    }
}

/// Why slots are being freed. Only used to label metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseReason {
    Removed,
    Downsized,
    Expired,
    Cleared,
}

impl ReleaseReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Removed => "removed",
            Self::Downsized => "downsized",
            Self::Expired => "expired",
            Self::Cleared => "cleared",
        }
    }
}

/// Inventory reservation engine.
///
/// Cheap to clone; clones share the ledger.
#[derive(Debug)]
pub struct InventoryService<L> {
    ledger: Arc<L>,
    config: ReservationConfig,
}

impl<L> Clone for InventoryService<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            config: self.config.clone(),
        }
    }
}

impl<L: ReservationLedger> InventoryService<L> {
    /// Create an engine over `ledger`.
    #[must_use]
    pub const fn new(ledger: Arc<L>, config: ReservationConfig) -> Self {
        Self { ledger, config }
    }

    /// The ledger this engine writes to.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &ReservationConfig {
        &self.config
    }

    /// Stock level at or below which a product enters scarce mode.
    #[must_use]
    pub const fn scarcity_threshold(&self) -> u32 {
        self.config.scarcity_threshold
    }

    /// Returns `true` if the product has a reservation pool.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::ServiceUnavailable`] if the ledger call fails.
    pub async fn is_scarce(&self, product_id: ProductId) -> Result<bool> {
        self.ledger
            .key_exists(&pool_key(product_id))
            .await
            .map_err(ledger_failure("is_scarce", product_id))
    }

    /// Create a pool of `stock_snapshot` empty slots, unless one already exists.
    ///
    /// Existing pools are never overwritten or resized. A zero snapshot
    /// creates nothing.
    ///
    /// # Returns
    ///
    /// `true` if this call created the pool.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::ServiceUnavailable`] if the ledger call fails;
    /// no reservation can be assumed in that case.
    pub async fn create_pool(&self, product_id: ProductId, stock_snapshot: u32) -> Result<bool> {
        if stock_snapshot == 0 {
            debug!(product_id = %product_id, "Zero stock snapshot, no pool created");
            return Ok(false);
        }

        let fields: Vec<String> = (1..=stock_snapshot).map(|slot| slot.to_string()).collect();
        let created = self
            .ledger
            .init_fields(&pool_key(product_id), &fields, EMPTY_OCCUPANT)
            .await
            .map_err(ledger_failure("create_pool", product_id))?;

        if created {
            ReservationMetrics::record_pool_created();
            info!(product_id = %product_id, slots = stock_snapshot, "Product entered scarce mode");
        } else {
            debug!(product_id = %product_id, "Reservation pool already exists");
        }
        Ok(created)
    }

    /// Free slots of a product's pool, in ascending order.
    ///
    /// Empty when the product has no pool.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::ServiceUnavailable`] if the ledger call fails.
    pub async fn empty_slots(&self, product_id: ProductId) -> Result<Vec<SlotIndex>> {
        self.slots_held_by(product_id, EMPTY_OCCUPANT).await
    }

    /// Claim exactly `quantity` free slots for `user_id`, or none.
    ///
    /// # Returns
    ///
    /// The claimed slots.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::InsufficientCapacity`] if fewer than `quantity`
    ///   slots are free (nothing is claimed)
    /// - [`ReservationError::ServiceUnavailable`] if the ledger call fails
    pub async fn reserve(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Vec<SlotIndex>> {
        if quantity == 0 {
            return Ok(Vec::new());
        }

        let claimed = self
            .ledger
            .claim_fields(&pool_key(product_id), quantity as usize, &user_id.to_string())
            .await
            .map_err(|e| {
                ReservationMetrics::record_reserve("failed");
                ledger_failure("reserve", product_id)(e)
            })?;

        let Some(fields) = claimed else {
            ReservationMetrics::record_reserve("insufficient");
            let available = self.empty_slots(product_id).await.map_or(0, |slots| to_u32(slots.len()));
            debug!(
                user_id = %user_id,
                product_id = %product_id,
                requested = quantity,
                available,
                "Not enough free slots"
            );
            return Err(ReservationError::InsufficientCapacity {
                product_id,
                requested: quantity,
                available,
            });
        };

        ReservationMetrics::record_reserve("reserved");
        let slots = parse_slots(&pool_key(product_id), fields);
        debug!(user_id = %user_id, product_id = %product_id, slots = ?slots, "Slots reserved");
        Ok(slots)
    }

    /// Free every slot `user_id` holds in the product's pool.
    ///
    /// A no-op when the pool is absent or the user holds nothing, so calling
    /// it twice is safe.
    ///
    /// # Returns
    ///
    /// Number of slots freed.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::ServiceUnavailable`] if the ledger call fails.
    pub async fn release(&self, user_id: UserId, product_id: ProductId) -> Result<usize> {
        self.release_for(user_id, product_id, ReleaseReason::Removed).await
    }

    pub(crate) async fn release_for(
        &self,
        user_id: UserId,
        product_id: ProductId,
        reason: ReleaseReason,
    ) -> Result<usize> {
        let outcome = self
            .ledger
            .clear_fields(&pool_key(product_id), &user_id.to_string(), None)
            .await
            .map_err(ledger_failure("release", product_id))?;

        let released = match outcome {
            ClearOutcome::Cleared(n) => n,
            ClearOutcome::Insufficient { .. } => 0,
        };
        ReservationMetrics::record_released(reason.as_str(), released);
        if released > 0 {
            debug!(
                user_id = %user_id,
                product_id = %product_id,
                released,
                reason = reason.as_str(),
                "Slots released"
            );
        }
        Ok(released)
    }

    /// Free exactly `count` of the slots `user_id` holds, or none.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::OverRelease`] if the user holds fewer than
    ///   `count` slots (nothing is freed)
    /// - [`ReservationError::ServiceUnavailable`] if the ledger call fails
    pub async fn release_partial(&self, user_id: UserId, product_id: ProductId, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }

        let outcome = self
            .ledger
            .clear_fields(&pool_key(product_id), &user_id.to_string(), Some(count as usize))
            .await
            .map_err(ledger_failure("release_partial", product_id))?;

        match outcome {
            ClearOutcome::Cleared(n) => {
                ReservationMetrics::record_released(ReleaseReason::Downsized.as_str(), n);
                debug!(user_id = %user_id, product_id = %product_id, released = n, "Slots released");
                Ok(())
            }
            ClearOutcome::Insufficient { held } => {
                let held = to_u32(held);
                error!(
                    user_id = %user_id,
                    product_id = %product_id,
                    requested = count,
                    held,
                    "Attempted to release more slots than held"
                );
                Err(ReservationError::OverRelease {
                    user_id,
                    product_id,
                    requested: count,
                    held,
                })
            }
        }
    }

    /// Free whatever `user_id` holds beyond `keep` slots.
    ///
    /// Holding fewer than `keep` frees nothing. Returns the number freed.
    pub(crate) async fn release_surplus(
        &self,
        user_id: UserId,
        product_id: ProductId,
        keep: u32,
        reason: ReleaseReason,
    ) -> Result<usize> {
        let held = self.held_slots(user_id, product_id).await?.len();
        let surplus = held.saturating_sub(keep as usize);
        if surplus == 0 {
            return Ok(0);
        }

        let outcome = self
            .ledger
            .clear_fields(&pool_key(product_id), &user_id.to_string(), Some(surplus))
            .await
            .map_err(ledger_failure("release_surplus", product_id))?;

        match outcome {
            ClearOutcome::Cleared(n) => {
                ReservationMetrics::record_released(reason.as_str(), n);
                debug!(
                    user_id = %user_id,
                    product_id = %product_id,
                    released = n,
                    kept = keep,
                    reason = reason.as_str(),
                    "Surplus slots released"
                );
                Ok(n)
            }
            // A concurrent release got there first.
            ClearOutcome::Insufficient { held } => {
                debug!(user_id = %user_id, product_id = %product_id, held, "Surplus already released");
                Ok(0)
            }
        }
    }

    /// Slots currently held by `user_id`, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::ServiceUnavailable`] if the ledger call fails.
    pub async fn held_slots(&self, user_id: UserId, product_id: ProductId) -> Result<Vec<SlotIndex>> {
        self.slots_held_by(product_id, &user_id.to_string()).await
    }

    /// Capacity and occupancy of a product's pool, or `None` when not scarce.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::ServiceUnavailable`] if the ledger call fails.
    pub async fn pool_status(&self, product_id: ProductId) -> Result<Option<PoolStatus>> {
        let fields = self
            .ledger
            .get_all_fields(&pool_key(product_id))
            .await
            .map_err(ledger_failure("pool_status", product_id))?;

        if fields.is_empty() {
            return Ok(None);
        }
        let occupied = fields.values().filter(|occupant| occupant.as_str() != EMPTY_OCCUPANT).count();
        Ok(Some(PoolStatus {
            capacity: to_u32(fields.len()),
            occupied: to_u32(occupied),
        }))
    }

    async fn slots_held_by(&self, product_id: ProductId, occupant: &str) -> Result<Vec<SlotIndex>> {
        let key = pool_key(product_id);
        let fields = self
            .ledger
            .get_all_fields(&key)
            .await
            .map_err(ledger_failure("read_pool", product_id))?;

        let names = fields
            .into_iter()
            .filter(|(_, value)| value == occupant)
            .map(|(name, _)| name);
        Ok(parse_slots(&key, names))
    }
}

/// Map a ledger error to `ServiceUnavailable`, logging it with context.
fn ledger_failure(operation: &'static str, product_id: ProductId) -> impl Fn(LedgerError) -> ReservationError {
    move |e| {
        warn!(operation, product_id = %product_id, error = %e, "Ledger call failed");
        ReservationError::from(e)
    }
}

/// Parse slot field names, skipping (and logging) anything non-numeric.
fn parse_slots(key: &str, names: impl IntoIterator<Item = String>) -> Vec<SlotIndex> {
    let mut slots: Vec<SlotIndex> = names
        .into_iter()
        .filter_map(|name| match name.parse() {
            Ok(slot) => Some(slot),
            Err(_) => {
                warn!(key, field = %name, "Ignoring malformed slot field");
                None
            }
        })
        .collect();
    slots.sort_unstable();
    slots
}

fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use storefront_testing::{FaultyLedger, InMemoryLedger, LedgerOp};
    use tokio_test::assert_ok;

    const P: ProductId = ProductId(42);
    const ALICE: UserId = UserId(1);
    const BOB: UserId = UserId(2);

    fn engine() -> InventoryService<InMemoryLedger> {
        InventoryService::new(Arc::new(InMemoryLedger::new()), ReservationConfig::default())
    }

    fn slots(indices: &[u32]) -> Vec<SlotIndex> {
        indices.iter().copied().map(SlotIndex).collect()
    }

    #[tokio::test]
    async fn test_create_pool_is_create_if_absent() {
        let engine = engine();
        assert!(!assert_ok!(engine.is_scarce(P).await));

        assert!(assert_ok!(engine.create_pool(P, 3).await));
        engine.reserve(ALICE, P, 1).await.unwrap();

        assert!(!assert_ok!(engine.create_pool(P, 8).await));
        let status = engine.pool_status(P).await.unwrap().unwrap();
        assert_eq!(status, PoolStatus { capacity: 3, occupied: 1 });
        assert!(assert_ok!(engine.is_scarce(P).await));
    }

    #[tokio::test]
    async fn test_zero_snapshot_creates_nothing() {
        let engine = engine();
        assert!(!engine.create_pool(P, 0).await.unwrap());
        assert!(!engine.is_scarce(P).await.unwrap());
        assert_eq!(engine.pool_status(P).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_slots_ascending() {
        let engine = engine();
        engine.create_pool(P, 12).await.unwrap();
        engine.reserve(ALICE, P, 2).await.unwrap();

        let free = engine.empty_slots(P).await.unwrap();
        assert_eq!(free, (3..=12).map(SlotIndex).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_reserve_claims_lowest_free_slots() {
        let engine = engine();
        engine.create_pool(P, 5).await.unwrap();

        assert_eq!(engine.reserve(ALICE, P, 2).await.unwrap(), slots(&[1, 2]));
        assert_eq!(engine.reserve(BOB, P, 2).await.unwrap(), slots(&[3, 4]));
        assert_eq!(engine.held_slots(ALICE, P).await.unwrap(), slots(&[1, 2]));
    }

    #[tokio::test]
    async fn test_reserve_more_than_capacity_claims_nothing() {
        let engine = engine();
        engine.create_pool(P, 4).await.unwrap();

        let err = engine.reserve(ALICE, P, 5).await.unwrap_err();
        assert_eq!(
            err,
            ReservationError::InsufficientCapacity { product_id: P, requested: 5, available: 4 }
        );
        assert_eq!(engine.pool_status(P).await.unwrap().unwrap().occupied, 0);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let engine = engine();
        engine.create_pool(P, 4).await.unwrap();
        engine.reserve(ALICE, P, 3).await.unwrap();

        assert_eq!(engine.release(ALICE, P).await.unwrap(), 3);
        assert_eq!(engine.release(ALICE, P).await.unwrap(), 0);
        assert_eq!(engine.empty_slots(P).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_release_without_pool_is_noop() {
        let engine = engine();
        assert_eq!(engine.release(ALICE, P).await.unwrap(), 0);
        assert!(!engine.is_scarce(P).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_only_touches_own_slots() {
        let engine = engine();
        engine.create_pool(P, 4).await.unwrap();
        engine.reserve(ALICE, P, 2).await.unwrap();
        engine.reserve(BOB, P, 2).await.unwrap();

        engine.release(ALICE, P).await.unwrap();

        assert_eq!(engine.held_slots(BOB, P).await.unwrap(), slots(&[3, 4]));
        assert_eq!(engine.empty_slots(P).await.unwrap(), slots(&[1, 2]));
    }

    #[tokio::test]
    async fn test_release_partial_exact() {
        let engine = engine();
        engine.create_pool(P, 5).await.unwrap();
        engine.reserve(ALICE, P, 3).await.unwrap();

        engine.release_partial(ALICE, P, 2).await.unwrap();
        assert_eq!(engine.held_slots(ALICE, P).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_over_release_frees_nothing() {
        let engine = engine();
        engine.create_pool(P, 5).await.unwrap();
        engine.reserve(ALICE, P, 1).await.unwrap();

        let err = engine.release_partial(ALICE, P, 2).await.unwrap_err();
        assert_eq!(
            err,
            ReservationError::OverRelease { user_id: ALICE, product_id: P, requested: 2, held: 1 }
        );
        assert_eq!(err.status_code(), 500);
        assert_eq!(engine.held_slots(ALICE, P).await.unwrap(), slots(&[1]));
    }

    #[tokio::test]
    async fn test_pool_creation_failure_is_service_unavailable() {
        let ledger = Arc::new(FaultyLedger::new(InMemoryLedger::new()));
        ledger.fail(LedgerOp::InitFields);
        let engine = InventoryService::new(Arc::clone(&ledger), ReservationConfig::default());

        let err = engine.create_pool(P, 5).await.unwrap_err();
        assert!(matches!(err, ReservationError::ServiceUnavailable(_)));
        assert!(err.is_transient());
        assert!(!engine.is_scarce(P).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_reserve_at_boundary() {
        let engine = engine();
        engine.create_pool(P, 5).await.unwrap();

        let tasks: Vec<_> = (0..6u64)
            .map(|user| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.reserve(UserId(user), P, 1).await })
            })
            .collect();

        let mut granted = 0;
        let mut rejected = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => granted += 1,
                Err(ReservationError::InsufficientCapacity { .. }) => rejected += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!((granted, rejected), (5, 1));
        assert_eq!(engine.pool_status(P).await.unwrap().unwrap().free(), 0);
    }

    #[test]
    fn test_config_builder() {
        let config = ReservationConfig::default()
            .with_scarcity_threshold(3)
            .with_cart_ttl(Duration::from_secs(60));
        assert_eq!(config.scarcity_threshold, 3);
        assert_eq!(config.cart_ttl, Duration::from_secs(60));
        assert_eq!(ReservationConfig::default().scarcity_threshold, DEFAULT_SCARCITY_THRESHOLD);
    }
}
