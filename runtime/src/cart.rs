//! Cart orchestrator.
//!
//! Combines reservation decisions with cart line mutations. Every mutation
//! returns `Result<CartOutcome, ReservationError>`; render it with
//! [`CartResponse::from`](storefront_core::CartResponse) at the HTTP boundary.
//!
//! # Known inconsistency window
//!
//! `add_to_cart` merges the cart line before claiming slots. If the claim
//! then fails the line keeps the merged quantity and the call returns
//! [`ReservationError::ReservationFailed`]. Cart quantity alone is therefore
//! not proof of reserved capacity.
//!
//! Concurrent add and delete for the same (user, product) are not serialised.

use crate::inventory::{InventoryService, ReleaseReason};
use crate::metrics::CartMetrics;
use futures::future::join_all;
use std::sync::Arc;
use storefront_core::keys::{cart_line_key, cart_prefix, parse_cart_line_key};
use storefront_core::providers::{ReservationLedger, SearchIndex, StockStore};
use storefront_core::{
    CartItem, CartLine, CartOutcome, ProductId, ReservationError, Result, UserId,
};
use tracing::{debug, info, warn};

/// Cart orchestrator.
#[derive(Debug)]
pub struct CartService<L, S, I> {
    inventory: InventoryService<L>,
    stock: Arc<S>,
    search: Arc<I>,
}

impl<L, S, I> Clone for CartService<L, S, I> {
    fn clone(&self) -> Self {
        Self {
            inventory: self.inventory.clone(),
            stock: Arc::clone(&self.stock),
            search: Arc::clone(&self.search),
        }
    }
}

impl<L, S, I> CartService<L, S, I>
where
    L: ReservationLedger,
    S: StockStore,
    I: SearchIndex,
{
    /// Create an orchestrator.
    #[must_use]
    pub const fn new(inventory: InventoryService<L>, stock: Arc<S>, search: Arc<I>) -> Self {
        Self {
            inventory,
            stock,
            search,
        }
    }

    /// The reservation engine behind this orchestrator.
    #[must_use]
    pub const fn inventory(&self) -> &InventoryService<L> {
        &self.inventory
    }

    /// Add `quantity` units of a product to the user's cart.
    ///
    /// Quantities merge with an existing line. For scarce products the added
    /// units are backed by freshly claimed slots.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::InvalidQuantity`] for a zero quantity
    /// - [`ReservationError::ProductUnavailable`] if the product is unknown or disabled
    /// - [`ReservationError::InsufficientCapacity`] if stock (or every slot) is taken
    /// - [`ReservationError::QuantityExceedsAvailable`] if fewer slots are free than requested
    /// - [`ReservationError::ServiceUnavailable`] if a backend call fails
    /// - [`ReservationError::ReservationFailed`] if the line was merged but slots could not be claimed
    pub async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartOutcome> {
        let result = self.add(user_id, product_id, quantity).await;
        CartMetrics::record("add", &result);
        result
    }

    /// Set the cart quantity of a product.
    ///
    /// Zero removes the line. Shrinking frees the slots held beyond the new
    /// quantity;
    /// growing goes through [`add_to_cart`](Self::add_to_cart) with the delta.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::ProductNotInCart`] if there is no line to update
    /// - any error of [`add_to_cart`](Self::add_to_cart) when growing
    pub async fn update_cart_quantity(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartOutcome> {
        let result = self.update(user_id, product_id, quantity).await;
        CartMetrics::record("update", &result);
        result
    }

    /// Remove a product from the cart and free its slots.
    ///
    /// Removing a product that is not in the cart succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::ServiceUnavailable`] if a ledger call fails.
    pub async fn delete_from_cart(&self, user_id: UserId, product_id: ProductId) -> Result<CartOutcome> {
        let result = self.delete(user_id, product_id, ReleaseReason::Removed).await;
        CartMetrics::record("delete", &result);
        result
    }

    /// List the user's cart lines enriched with product details.
    ///
    /// Missing documents and search index failures leave the detail fields
    /// empty; they never fail the call.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::ServiceUnavailable`] if the ledger cannot be read.
    pub async fn get_cart(&self, user_id: UserId) -> Result<Vec<CartItem>> {
        let lines = self.lines(user_id).await?;

        let documents = join_all(lines.iter().map(|line| async move {
            match self.search.get_document(line.product_id).await {
                Ok(document) => {
                    if document.is_none() {
                        debug!(product_id = %line.product_id, "No search document for cart line");
                    }
                    document
                }
                Err(e) => {
                    warn!(product_id = %line.product_id, error = %e, "Search index lookup failed");
                    None
                }
            }
        }))
        .await;

        Ok(lines
            .iter()
            .zip(documents)
            .map(|(line, document)| CartItem::from_line(line, document))
            .collect())
    }

    /// Remove every line from the user's cart and free their slots.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::ServiceUnavailable`] if a ledger call fails;
    /// lines processed before the failure stay removed.
    pub async fn clear_cart(&self, user_id: UserId) -> Result<CartOutcome> {
        let result = self.clear(user_id).await;
        CartMetrics::record("clear", &result);
        result
    }

    async fn add(&self, user_id: UserId, product_id: ProductId, quantity: u32) -> Result<CartOutcome> {
        if quantity == 0 {
            return Err(ReservationError::InvalidQuantity);
        }

        let mut scarce = self.inventory.is_scarce(product_id).await?;
        if scarce {
            self.check_free_slots(product_id, quantity).await?;
        } else {
            let summary = self
                .stock
                .remaining_quantity(product_id)
                .await
                .map_err(|e| {
                    warn!(product_id = %product_id, error = %e, "Stock store query failed");
                    ReservationError::from(e)
                })?
                .ok_or(ReservationError::ProductUnavailable { product_id })?;

            let available = summary.available_quantity;
            if available < quantity {
                debug!(product_id = %product_id, requested = quantity, available, "Not enough stock");
                return Err(ReservationError::InsufficientCapacity {
                    product_id,
                    requested: quantity,
                    available,
                });
            }

            if available <= self.inventory.scarcity_threshold() {
                let created = self.inventory.create_pool(product_id, available).await?;
                scarce = true;
                if !created {
                    // Another request created the pool first; its slots may already be taken.
                    self.check_free_slots(product_id, quantity).await?;
                }
            }
        }

        let key = cart_line_key(user_id, product_id);
        let merged = self
            .inventory
            .ledger()
            .increment_with_ttl(&key, i64::from(quantity), self.inventory.config().cart_ttl)
            .await
            .map_err(|e| {
                warn!(user_id = %user_id, product_id = %product_id, error = %e, "Cart line write failed");
                ReservationError::from(e)
            })?;
        debug!(user_id = %user_id, product_id = %product_id, quantity = merged, "Cart line merged");

        if !scarce {
            scarce = self.inventory.is_scarce(product_id).await.map_err(|e| reservation_failed(product_id, &e))?;
        }
        if scarce {
            self.inventory
                .reserve(user_id, product_id, quantity)
                .await
                .map_err(|e| reservation_failed(product_id, &e))?;
        }

        info!(user_id = %user_id, product_id = %product_id, quantity, "Goods added to cart");
        Ok(CartOutcome::ok("Goods added to cart successfully"))
    }

    async fn update(&self, user_id: UserId, product_id: ProductId, quantity: u32) -> Result<CartOutcome> {
        if quantity == 0 {
            return self.delete(user_id, product_id, ReleaseReason::Removed).await;
        }

        let current = self.line_quantity(user_id, product_id).await?.unwrap_or(0);
        if current == 0 {
            return Err(ReservationError::ProductNotInCart { product_id });
        }

        if quantity == current {
            return Ok(CartOutcome::ok("Quantity remains the same"));
        }

        if quantity > current {
            self.add(user_id, product_id, quantity - current).await?;
            return Ok(CartOutcome::ok("Cart updated successfully"));
        }

        // Lines added before the pool existed hold fewer slots than units.
        self.inventory
            .release_surplus(user_id, product_id, quantity, ReleaseReason::Downsized)
            .await?;
        self.inventory
            .ledger()
            .set_with_ttl(
                &cart_line_key(user_id, product_id),
                &quantity.to_string(),
                self.inventory.config().cart_ttl,
            )
            .await?;

        debug!(user_id = %user_id, product_id = %product_id, from = current, to = quantity, "Cart line shrunk");
        Ok(CartOutcome::ok("Cart updated successfully"))
    }

    async fn delete(&self, user_id: UserId, product_id: ProductId, reason: ReleaseReason) -> Result<CartOutcome> {
        if self.inventory.is_scarce(product_id).await? {
            self.inventory.release_for(user_id, product_id, reason).await?;
        }
        let removed = self
            .inventory
            .ledger()
            .delete_key(&cart_line_key(user_id, product_id))
            .await?;

        if removed {
            debug!(user_id = %user_id, product_id = %product_id, "Cart line removed");
        }
        Ok(CartOutcome::ok("Product removed from cart"))
    }

    async fn clear(&self, user_id: UserId) -> Result<CartOutcome> {
        let keys = self.inventory.ledger().keys_with_prefix(&cart_prefix(user_id)).await?;

        let mut removed = 0usize;
        for key in keys {
            let Some((owner, product_id)) = parse_cart_line_key(&key) else {
                debug!(key = %key, "Skipping unparseable cart key");
                continue;
            };
            if owner != user_id {
                continue;
            }
            self.delete(user_id, product_id, ReleaseReason::Cleared).await?;
            removed += 1;
        }

        info!(user_id = %user_id, lines = removed, "Cart cleared");
        Ok(CartOutcome::ok("Cart cleared"))
    }

    /// Pre-claim capacity check against an existing pool.
    async fn check_free_slots(&self, product_id: ProductId, quantity: u32) -> Result<()> {
        let free = u32::try_from(self.inventory.empty_slots(product_id).await?.len()).unwrap_or(u32::MAX);
        if free == 0 {
            debug!(product_id = %product_id, requested = quantity, "Every slot is taken");
            return Err(ReservationError::InsufficientCapacity {
                product_id,
                requested: quantity,
                available: 0,
            });
        }
        if free < quantity {
            debug!(product_id = %product_id, requested = quantity, available = free, "Not enough free slots");
            return Err(ReservationError::QuantityExceedsAvailable {
                product_id,
                requested: quantity,
                available: free,
            });
        }
        Ok(())
    }

    async fn line_quantity(&self, user_id: UserId, product_id: ProductId) -> Result<Option<u32>> {
        let key = cart_line_key(user_id, product_id);
        let Some(raw) = self.inventory.ledger().get_value(&key).await? else {
            return Ok(None);
        };
        parse_quantity(&key, &raw)
            .map(Some)
            .ok_or_else(|| ReservationError::ServiceUnavailable(format!("malformed cart line {key}")))
    }

    async fn lines(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let keys = self.inventory.ledger().keys_with_prefix(&cart_prefix(user_id)).await?;

        let mut lines = Vec::with_capacity(keys.len());
        for key in keys {
            let Some((owner, product_id)) = parse_cart_line_key(&key) else {
                debug!(key = %key, "Skipping unparseable cart key");
                continue;
            };
            if owner != user_id {
                continue;
            }
            // Gone by now means it expired between the scan and the read.
            let Some(raw) = self.inventory.ledger().get_value(&key).await? else {
                continue;
            };
            if let Some(quantity) = parse_quantity(&key, &raw).filter(|&q| q > 0) {
                lines.push(CartLine {
                    user_id,
                    product_id,
                    quantity,
                });
            }
        }
        lines.sort_by_key(|line| line.product_id);
        Ok(lines)
    }
}

fn parse_quantity(key: &str, raw: &str) -> Option<u32> {
    match raw.parse::<u32>() {
        Ok(quantity) => Some(quantity),
        Err(e) => {
            warn!(key, value = raw, error = %e, "Malformed cart line quantity");
            None
        }
    }
}

fn reservation_failed(product_id: ProductId, err: &ReservationError) -> ReservationError {
    warn!(product_id = %product_id, error = %err, "Cart line merged but slots were not reserved");
    ReservationError::ReservationFailed {
        product_id,
        reason: err.to_string(),
    }
}
