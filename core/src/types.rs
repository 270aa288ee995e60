//! Domain types for the reservation core.
//!
//! Identifiers are thin newtypes over the relational ids used by the product
//! and user tables. They render as plain decimals because that is how they
//! appear inside ledger keys and slot occupant values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a shopper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl UserId {
    /// Create a `UserId` from its numeric value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the numeric value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Unique identifier for a product.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductId(pub u64);

impl ProductId {
    /// Create a `ProductId` from its numeric value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the numeric value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProductId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Position of a slot inside a reservation pool (1-based).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotIndex(pub u32);

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SlotIndex {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

// ============================================================================
// Records
// ============================================================================

/// Remaining sellable units for a product, as reported by the durable store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummary {
    /// Product the count belongs to
    pub product_id: ProductId,
    /// Units that are still available for sale
    pub available_quantity: u32,
}

/// One product line in a shopper's cart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Owner of the cart
    pub user_id: UserId,
    /// Product in the cart
    pub product_id: ProductId,
    /// Quantity in the cart (always positive)
    pub quantity: u32,
}

/// Display data for a product, read from the search index.
///
/// Every field is optional: the index is an external collaborator and a
/// partially indexed product must still render in a cart.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDocument {
    /// Product display name
    #[serde(default)]
    pub product_name: Option<String>,
    /// List price
    #[serde(default)]
    pub price: Option<i64>,
    /// Discounted price (0 or absent when no discount applies)
    #[serde(default)]
    pub discounted_price: Option<i64>,
    /// Seller brand name
    #[serde(default)]
    pub brand_name: Option<String>,
}

/// A cart line joined with point-in-time product display data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Product in the cart
    pub product_id: ProductId,
    /// Quantity in the cart
    pub quantity: u32,
    /// Product display name
    pub product_name: Option<String>,
    /// List price
    pub price: Option<i64>,
    /// Discounted price
    pub discounted_price: Option<i64>,
    /// Seller brand name
    pub brand_name: Option<String>,
}

impl CartItem {
    /// Join a cart line with optional display data.
    #[must_use]
    pub fn from_line(line: &CartLine, document: Option<ProductDocument>) -> Self {
        let document = document.unwrap_or_default();
        Self {
            product_id: line.product_id,
            quantity: line.quantity,
            product_name: document.product_name,
            price: document.price,
            discounted_price: document.discounted_price,
            brand_name: document.brand_name,
        }
    }
}

/// Occupancy snapshot of a reservation pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Number of slots the pool was created with
    pub capacity: u32,
    /// Slots currently held by some user
    pub occupied: u32,
}

impl PoolStatus {
    /// Slots still free to reserve.
    #[must_use]
    pub const fn free(&self) -> u32 {
        self.capacity.saturating_sub(self.occupied)
    }
}
