//! Integration tests for the cart orchestrator over in-memory backends.
//!
//! Covers the end-to-end shopper flows: scarce-mode entry, capacity
//! rejections, downsizing, expiry and the failure paths.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;
use storefront_core::providers::ReservationLedger;
use storefront_core::{CartResponse, PoolStatus, ProductDocument, ProductId, ReservationError, UserId};
use storefront_runtime::{
    CartService, ExpiryAction, ExpiryReconciler, InventoryService, ReconcilerConfig, ReservationConfig,
};
use storefront_testing::helpers::wait_until;
use storefront_testing::{
    FaultyLedger, InMemoryLedger, InMemorySearchIndex, InMemoryStockStore, LedgerOp, MockClock,
};
use tokio::sync::broadcast;

const U1: UserId = UserId(1);
const U2: UserId = UserId(2);
const P1: ProductId = ProductId(1);
const P2: ProductId = ProductId(2);

struct Shop<L> {
    ledger: Arc<L>,
    stock: Arc<InMemoryStockStore>,
    search: Arc<InMemorySearchIndex>,
    carts: CartService<L, InMemoryStockStore, InMemorySearchIndex>,
}

impl<L: ReservationLedger> Shop<L> {
    fn over(ledger: L) -> Self {
        let ledger = Arc::new(ledger);
        let stock = Arc::new(InMemoryStockStore::new());
        let search = Arc::new(InMemorySearchIndex::new());
        let inventory = InventoryService::new(Arc::clone(&ledger), ReservationConfig::default());
        let carts = CartService::new(inventory, Arc::clone(&stock), Arc::clone(&search));
        Self {
            ledger,
            stock,
            search,
            carts,
        }
    }

    fn inventory(&self) -> &InventoryService<L> {
        self.carts.inventory()
    }

    async fn line(&self, user: UserId, product: ProductId) -> Option<u32> {
        self.ledger
            .get_value(&format!("cart:{user}:{product}"))
            .await
            .unwrap()
            .map(|raw| raw.parse().unwrap())
    }

    async fn held(&self, user: UserId, product: ProductId) -> usize {
        self.inventory().held_slots(user, product).await.unwrap().len()
    }
}

fn shop() -> Shop<InMemoryLedger> {
    Shop::over(InMemoryLedger::new())
}

// ============================================================================
// Scarce-mode flows
// ============================================================================

#[tokio::test]
async fn low_stock_creates_pool_and_reserves() {
    let shop = shop();
    shop.stock.set_stock(P1, 5);

    let outcome = shop.carts.add_to_cart(U1, P1, 3).await.unwrap();

    assert_eq!(outcome.status_code, 200);
    assert_eq!(outcome.message, "Goods added to cart successfully");
    assert!(shop.inventory().is_scarce(P1).await.unwrap());
    assert_eq!(
        shop.inventory().pool_status(P1).await.unwrap(),
        Some(PoolStatus { capacity: 5, occupied: 3 })
    );
    assert_eq!(shop.held(U1, P1).await, 3);
    assert_eq!(shop.line(U1, P1).await, Some(3));
}

#[tokio::test]
async fn request_beyond_free_slots_is_rejected() {
    let shop = shop();
    shop.stock.set_stock(P1, 5);
    shop.carts.add_to_cart(U1, P1, 3).await.unwrap();

    let err = shop.carts.add_to_cart(U2, P1, 3).await.unwrap_err();

    assert_eq!(
        err,
        ReservationError::QuantityExceedsAvailable { product_id: P1, requested: 3, available: 2 }
    );
    assert_eq!(err.to_string(), "Quantity requested (3) exceeds available stock (2)");
    assert_eq!(err.status_code(), 400);
    assert_eq!(shop.held(U1, P1).await, 3);
    assert_eq!(shop.held(U2, P1).await, 0);
    assert_eq!(shop.line(U2, P1).await, None);
}

#[tokio::test]
async fn expired_line_frees_its_slots() {
    let clock = MockClock::default();
    let shop = Shop::over(InMemoryLedger::with_clock(Arc::new(clock.clone())));
    shop.stock.set_stock(P1, 5);
    shop.carts.add_to_cart(U1, P1, 3).await.unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let reconciler = ExpiryReconciler::new(shop.inventory().clone(), ReconcilerConfig::default(), shutdown_rx);
    let handle = reconciler.spawn();
    assert!(wait_until(Duration::from_secs(1), || async { shop.ledger.subscriber_count() == 1 }).await);

    clock.advance(chrono::Duration::minutes(16));
    assert_eq!(shop.ledger.purge_expired().unwrap(), vec!["cart:1:1".to_string()]);

    let freed = wait_until(Duration::from_secs(1), || async {
        shop.inventory().empty_slots(P1).await.unwrap().len() == 5
    })
    .await;
    assert!(freed);
    assert_eq!(shop.line(U1, P1).await, None);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn shrinking_releases_exact_surplus() {
    let shop = shop();
    shop.stock.set_stock(P1, 5);
    shop.carts.add_to_cart(U1, P1, 3).await.unwrap();

    let outcome = shop.carts.update_cart_quantity(U1, P1, 1).await.unwrap();

    assert_eq!(outcome.message, "Cart updated successfully");
    assert_eq!(shop.held(U1, P1).await, 1);
    assert_eq!(shop.line(U1, P1).await, Some(1));
    assert_eq!(shop.inventory().empty_slots(P1).await.unwrap().len(), 4);
}

#[tokio::test]
async fn plentiful_stock_skips_pool() {
    let shop = shop();
    shop.stock.set_stock(P1, 50);

    shop.carts.add_to_cart(U1, P1, 10).await.unwrap();

    assert!(!shop.inventory().is_scarce(P1).await.unwrap());
    assert_eq!(shop.line(U1, P1).await, Some(10));
}

#[tokio::test]
async fn stock_at_threshold_enters_scarce_mode() {
    let shop = shop();
    shop.stock.set_stock(P1, 10);

    shop.carts.add_to_cart(U1, P1, 1).await.unwrap();

    assert!(shop.inventory().is_scarce(P1).await.unwrap());
}

#[tokio::test]
async fn scarce_product_skips_stock_store() {
    let shop = shop();
    shop.stock.set_stock(P1, 5);
    shop.carts.add_to_cart(U1, P1, 1).await.unwrap();
    let reads = shop.stock.read_count();

    shop.carts.add_to_cart(U2, P1, 1).await.unwrap();

    assert_eq!(shop.stock.read_count(), reads);
}

#[tokio::test]
async fn adds_merge_and_reserve_each_increment() {
    let shop = shop();
    shop.stock.set_stock(P1, 5);

    shop.carts.add_to_cart(U1, P1, 2).await.unwrap();
    shop.carts.add_to_cart(U1, P1, 1).await.unwrap();

    assert_eq!(shop.line(U1, P1).await, Some(3));
    assert_eq!(shop.held(U1, P1).await, 3);
}

#[tokio::test]
async fn full_pool_reports_insufficient_capacity() {
    let shop = shop();
    shop.stock.set_stock(P1, 2);
    shop.carts.add_to_cart(U1, P1, 2).await.unwrap();

    let err = shop.carts.add_to_cart(U2, P1, 1).await.unwrap_err();

    assert_eq!(
        err,
        ReservationError::InsufficientCapacity { product_id: P1, requested: 1, available: 0 }
    );
    assert_eq!(err.status_code(), 409);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_adds_never_oversell() {
    let shop = shop();
    shop.stock.set_stock(P1, 3);

    let attempts: Vec<_> = (10..16u64)
        .map(|user| {
            let carts = shop.carts.clone();
            tokio::spawn(async move { carts.add_to_cart(UserId(user), P1, 1).await })
        })
        .collect();

    let mut granted = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => granted += 1,
            Err(
                ReservationError::InsufficientCapacity { .. }
                | ReservationError::ReservationFailed { .. },
            ) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(granted, 3);
    assert_eq!(
        shop.inventory().pool_status(P1).await.unwrap(),
        Some(PoolStatus { capacity: 3, occupied: 3 })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_for_last_slot_grant_exactly_one() {
    let shop = shop();
    shop.stock.set_stock(P1, 5);
    shop.carts.add_to_cart(U1, P1, 4).await.unwrap();

    let attempts: Vec<_> = (10..14u64)
        .map(|user| {
            let carts = shop.carts.clone();
            tokio::spawn(async move { carts.add_to_cart(UserId(user), P1, 1).await })
        })
        .collect();

    let mut granted = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => granted += 1,
            Err(
                ReservationError::InsufficientCapacity { .. }
                | ReservationError::ReservationFailed { .. },
            ) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(granted, 1);
    assert_eq!(shop.inventory().pool_status(P1).await.unwrap().unwrap().occupied, 5);
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn zero_quantity_is_invalid() {
    let shop = shop();
    shop.stock.set_stock(P1, 5);

    let err = shop.carts.add_to_cart(U1, P1, 0).await.unwrap_err();

    assert_eq!(err, ReservationError::InvalidQuantity);
    assert_eq!(shop.stock.read_count(), 0);
}

#[tokio::test]
async fn unknown_product_is_unavailable() {
    let shop = shop();

    let response = CartResponse::from(shop.carts.add_to_cart(U1, P1, 1).await);

    assert!(!response.is_success);
    assert_eq!(response.status_code, 404);
    assert_eq!(response.error.as_deref(), Some("product_unavailable"));
}

#[tokio::test]
async fn request_above_durable_stock_is_rejected() {
    let shop = shop();
    shop.stock.set_stock(P1, 50);

    let err = shop.carts.add_to_cart(U1, P1, 51).await.unwrap_err();

    assert_eq!(
        err,
        ReservationError::InsufficientCapacity { product_id: P1, requested: 51, available: 50 }
    );
    assert_eq!(shop.line(U1, P1).await, None);
}

#[tokio::test]
async fn stock_store_outage_is_service_unavailable() {
    let shop = shop();
    shop.stock.set_unavailable(true);

    let err = shop.carts.add_to_cart(U1, P1, 1).await.unwrap_err();

    assert!(matches!(err, ReservationError::ServiceUnavailable(_)));
    assert_eq!(err.status_code(), 503);
}

// ============================================================================
// Updates and removal
// ============================================================================

#[tokio::test]
async fn update_of_missing_line_is_rejected() {
    let shop = shop();
    shop.stock.set_stock(P1, 5);

    let err = shop.carts.update_cart_quantity(U1, P1, 2).await.unwrap_err();

    assert_eq!(err, ReservationError::ProductNotInCart { product_id: P1 });
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn update_to_same_quantity_is_noop() {
    let shop = shop();
    shop.stock.set_stock(P1, 5);
    shop.carts.add_to_cart(U1, P1, 2).await.unwrap();

    let outcome = shop.carts.update_cart_quantity(U1, P1, 2).await.unwrap();

    assert_eq!(outcome.message, "Quantity remains the same");
    assert_eq!(shop.held(U1, P1).await, 2);
}

#[tokio::test]
async fn growing_reserves_the_delta() {
    let shop = shop();
    shop.stock.set_stock(P1, 5);
    shop.carts.add_to_cart(U1, P1, 1).await.unwrap();

    shop.carts.update_cart_quantity(U1, P1, 4).await.unwrap();

    assert_eq!(shop.line(U1, P1).await, Some(4));
    assert_eq!(shop.held(U1, P1).await, 4);
}

#[tokio::test]
async fn growing_past_free_slots_leaves_line_alone() {
    let shop = shop();
    shop.stock.set_stock(P1, 5);
    shop.carts.add_to_cart(U1, P1, 1).await.unwrap();
    shop.carts.add_to_cart(U2, P1, 3).await.unwrap();

    let err = shop.carts.update_cart_quantity(U1, P1, 3).await.unwrap_err();

    assert!(matches!(err, ReservationError::QuantityExceedsAvailable { available: 1, .. }));
    assert_eq!(shop.line(U1, P1).await, Some(1));
}

#[tokio::test]
async fn update_to_zero_equals_delete() {
    let shop = shop();
    shop.stock.set_stock(P1, 5);
    shop.carts.add_to_cart(U1, P1, 3).await.unwrap();

    let outcome = shop.carts.update_cart_quantity(U1, P1, 0).await.unwrap();

    assert_eq!(outcome.message, "Product removed from cart");
    assert_eq!(shop.line(U1, P1).await, None);
    assert_eq!(shop.held(U1, P1).await, 0);
    assert_eq!(shop.inventory().empty_slots(P1).await.unwrap().len(), 5);
}

#[tokio::test]
async fn shrinking_line_added_before_pool_existed() {
    let shop = shop();
    shop.stock.set_stock(P1, 50);
    shop.carts.add_to_cart(U1, P1, 20).await.unwrap();

    // Stock sells down; the next shopper's add puts the product in scarce mode.
    shop.stock.set_stock(P1, 8);
    shop.carts.add_to_cart(U2, P1, 1).await.unwrap();
    assert!(shop.inventory().is_scarce(P1).await.unwrap());
    assert_eq!(shop.held(U1, P1).await, 0);

    let outcome = shop.carts.update_cart_quantity(U1, P1, 5).await.unwrap();

    assert_eq!(outcome.message, "Cart updated successfully");
    assert_eq!(shop.line(U1, P1).await, Some(5));
    assert_eq!(shop.held(U1, P1).await, 0);
    assert_eq!(shop.held(U2, P1).await, 1);
    assert_eq!(shop.inventory().empty_slots(P1).await.unwrap().len(), 7);
}

#[tokio::test]
async fn shrinking_releases_only_slots_beyond_new_quantity() {
    let shop = shop();
    shop.stock.set_stock(P1, 5);
    shop.carts.add_to_cart(U1, P1, 3).await.unwrap();
    // Slots drifted below the cart line.
    shop.inventory().release_partial(U1, P1, 2).await.unwrap();

    shop.carts.update_cart_quantity(U1, P1, 2).await.unwrap();
    assert_eq!(shop.line(U1, P1).await, Some(2));
    assert_eq!(shop.held(U1, P1).await, 1);

    shop.carts.update_cart_quantity(U1, P1, 0).await.unwrap();
    assert_eq!(shop.held(U1, P1).await, 0);
}

#[tokio::test]
async fn re_add_after_expiry_frees_expired_slots() {
    let clock = MockClock::default();
    let shop = Shop::over(InMemoryLedger::with_clock(Arc::new(clock.clone())));
    shop.stock.set_stock(P1, 5);
    shop.carts.add_to_cart(U1, P1, 3).await.unwrap();

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let reconciler = ExpiryReconciler::new(shop.inventory().clone(), ReconcilerConfig::default(), shutdown_rx);

    // The line expires, and the shopper adds again before the event is handled.
    clock.advance(chrono::Duration::minutes(16));
    shop.carts.add_to_cart(U1, P1, 1).await.unwrap();
    assert_eq!(shop.held(U1, P1).await, 4);

    let action = reconciler.handle_expired("cart:1:1").await.unwrap();

    assert_eq!(action, ExpiryAction::Released { slots: 3 });
    assert_eq!(shop.line(U1, P1).await, Some(1));
    assert_eq!(shop.held(U1, P1).await, 1);
    assert_eq!(shop.inventory().empty_slots(P1).await.unwrap().len(), 4);
}

#[tokio::test]
async fn delete_missing_line_succeeds() {
    let shop = shop();

    let outcome = shop.carts.delete_from_cart(U1, P1).await.unwrap();

    assert_eq!(outcome.message, "Product removed from cart");
}

#[tokio::test]
async fn delete_non_scarce_line() {
    let shop = shop();
    shop.stock.set_stock(P1, 50);
    shop.carts.add_to_cart(U1, P1, 5).await.unwrap();

    shop.carts.delete_from_cart(U1, P1).await.unwrap();

    assert_eq!(shop.line(U1, P1).await, None);
    assert!(!shop.inventory().is_scarce(P1).await.unwrap());
}

// ============================================================================
// Listing and clearing
// ============================================================================

#[tokio::test]
async fn get_cart_enriches_from_search_index() {
    let shop = shop();
    shop.stock.set_stock(P1, 50);
    shop.stock.set_stock(P2, 50);
    shop.search.insert(
        P1,
        ProductDocument {
            product_name: Some("Espresso beans".to_string()),
            price: Some(1800),
            discounted_price: Some(1500),
            brand_name: Some("Northside".to_string()),
        },
    );
    shop.carts.add_to_cart(U1, P2, 1).await.unwrap();
    shop.carts.add_to_cart(U1, P1, 2).await.unwrap();
    shop.carts.add_to_cart(U2, P1, 7).await.unwrap();

    let items = shop.carts.get_cart(U1).await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].product_id, P1);
    assert_eq!(items[0].quantity, 2);
    assert_eq!(items[0].product_name.as_deref(), Some("Espresso beans"));
    assert_eq!(items[0].discounted_price, Some(1500));
    assert_eq!(items[1].product_id, P2);
    assert_eq!(items[1].product_name, None);
}

#[tokio::test]
async fn get_cart_survives_search_outage() {
    let shop = shop();
    shop.stock.set_stock(P1, 50);
    shop.carts.add_to_cart(U1, P1, 2).await.unwrap();
    shop.search.set_unavailable(true);

    let items = shop.carts.get_cart(U1).await.unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 2);
    assert_eq!(items[0].price, None);
}

#[tokio::test]
async fn empty_cart_lists_nothing() {
    let shop = shop();
    assert!(shop.carts.get_cart(U1).await.unwrap().is_empty());
}

#[tokio::test]
async fn clear_cart_releases_everything() {
    let shop = shop();
    shop.stock.set_stock(P1, 5);
    shop.stock.set_stock(P2, 50);
    shop.carts.add_to_cart(U1, P1, 3).await.unwrap();
    shop.carts.add_to_cart(U1, P2, 4).await.unwrap();
    shop.carts.add_to_cart(U2, P1, 1).await.unwrap();

    shop.carts.clear_cart(U1).await.unwrap();

    assert!(shop.carts.get_cart(U1).await.unwrap().is_empty());
    assert_eq!(shop.held(U1, P1).await, 0);
    assert_eq!(shop.held(U2, P1).await, 1);
    assert_eq!(shop.line(U2, P1).await, Some(1));
}

// ============================================================================
// Ledger failures
// ============================================================================

#[tokio::test]
async fn pool_creation_failure_is_service_unavailable() {
    let shop = Shop::over(FaultyLedger::new(InMemoryLedger::new()));
    shop.stock.set_stock(P1, 5);
    shop.ledger.fail(LedgerOp::InitFields);

    let err = shop.carts.add_to_cart(U1, P1, 1).await.unwrap_err();

    assert!(matches!(err, ReservationError::ServiceUnavailable(_)));
    assert_eq!(shop.line(U1, P1).await, None);
}

#[tokio::test]
async fn failed_claim_keeps_merged_line() {
    let shop = Shop::over(FaultyLedger::new(InMemoryLedger::new()));
    shop.stock.set_stock(P1, 5);
    shop.carts.add_to_cart(U1, P1, 1).await.unwrap();
    shop.ledger.fail(LedgerOp::ClaimFields);

    let err = shop.carts.add_to_cart(U1, P1, 2).await.unwrap_err();

    assert!(matches!(err, ReservationError::ReservationFailed { product_id: P1, .. }));
    assert_eq!(err.status_code(), 409);
    assert_eq!(shop.line(U1, P1).await, Some(3));
    assert_eq!(shop.held(U1, P1).await, 1);
}

#[tokio::test]
async fn cart_write_failure_reserves_nothing() {
    let shop = Shop::over(FaultyLedger::new(InMemoryLedger::new()));
    shop.stock.set_stock(P1, 5);
    shop.ledger.fail(LedgerOp::IncrementWithTtl);

    let err = shop.carts.add_to_cart(U1, P1, 2).await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(shop.held(U1, P1).await, 0);
}
