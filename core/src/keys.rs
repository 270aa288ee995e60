//! Ledger key scheme.
//!
//! Every ledger backend stores records under the same keys:
//!
//! - `product:{product_id}:inventory` → hash of slot index → occupant (`""` when free)
//! - `cart:{user_id}:{product_id}` → decimal quantity with TTL

use crate::types::{ProductId, UserId};

/// Prefix shared by all cart line keys.
pub const CART_PREFIX: &str = "cart:";

/// Occupant value of a free slot.
pub const EMPTY_OCCUPANT: &str = "";

/// Key of the reservation pool for a product.
#[must_use]
pub fn pool_key(product_id: ProductId) -> String {
    format!("product:{product_id}:inventory")
}

/// Key of a shopper's cart line for a product.
#[must_use]
pub fn cart_line_key(user_id: UserId, product_id: ProductId) -> String {
    format!("{CART_PREFIX}{user_id}:{product_id}")
}

/// Prefix matching every cart line of a shopper.
#[must_use]
pub fn cart_prefix(user_id: UserId) -> String {
    format!("{CART_PREFIX}{user_id}:")
}

/// Parse a cart line key back into its ids.
///
/// Returns `None` for any key that is not a cart line key, so callers can feed
/// arbitrary expiry notifications through it.
#[must_use]
pub fn parse_cart_line_key(key: &str) -> Option<(UserId, ProductId)> {
    let rest = key.strip_prefix(CART_PREFIX)?;
    let (user, product) = rest.split_once(':')?;
    Some((user.parse().ok()?, product.parse().ok()?))
}
