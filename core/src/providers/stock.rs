//! Durable stock store trait.

use crate::error::StockStoreError;
use crate::types::{ProductId, StockSummary};
use std::future::Future;

/// Authoritative count of sellable units.
///
/// Read-only to the reservation core; sales decrement it elsewhere.
pub trait StockStore: Send + Sync {
    /// Remaining sellable units for a product.
    ///
    /// # Returns
    ///
    /// `None` if the product is unknown or disabled.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn remaining_quantity(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Option<StockSummary>, StockStoreError>> + Send;
}
