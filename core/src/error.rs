//! Error types for reservation and cart operations.

use crate::types::{ProductId, UserId};
use thiserror::Error;

/// Result type alias for reservation and cart operations.
pub type Result<T> = std::result::Result<T, ReservationError>;

/// Failures a reservation or cart operation can end in.
///
/// Capacity and availability failures are ordinary outcomes that callers
/// render to the shopper. `OverRelease` is a bookkeeping bug and is logged at
/// error level wherever it is produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReservationError {
    // ═══════════════════════════════════════════════════════════
    // Availability
    // ═══════════════════════════════════════════════════════════

    /// Product is unknown or disabled.
    #[error("Product {product_id} is not available")]
    ProductUnavailable {
        /// Requested product
        product_id: ProductId,
    },

    /// Not enough stock or free slots.
    #[error("Insufficient capacity for product {product_id}: requested {requested}, available {available}")]
    InsufficientCapacity {
        /// Requested product
        product_id: ProductId,
        /// Quantity requested
        requested: u32,
        /// Units or slots available at evaluation time
        available: u32,
    },

    /// Requested more than is currently free.
    #[error("Quantity requested ({requested}) exceeds available stock ({available})")]
    QuantityExceedsAvailable {
        /// Requested product
        product_id: ProductId,
        /// Quantity requested
        requested: u32,
        /// Free slots at evaluation time
        available: u32,
    },

    // ═══════════════════════════════════════════════════════════
    // Request shape
    // ═══════════════════════════════════════════════════════════

    /// Quantity must be positive.
    #[error("Quantity must be greater than zero")]
    InvalidQuantity,

    /// Quantity update for a product the shopper has no cart line for.
    #[error("Product {product_id} not in cart")]
    ProductNotInCart {
        /// Requested product
        product_id: ProductId,
    },

    // ═══════════════════════════════════════════════════════════
    // System
    // ═══════════════════════════════════════════════════════════

    /// Ledger or stock store could not complete the call. Transient.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Release requested more slots than the user holds.
    #[error("Over-release for user {user_id} on product {product_id}: requested {requested}, held {held}")]
    OverRelease {
        /// User whose slots were being released
        user_id: UserId,
        /// Product the pool belongs to
        product_id: ProductId,
        /// Slots the caller asked to release
        requested: u32,
        /// Slots the user actually holds
        held: u32,
    },

    /// Cart line was merged but slots could not be reserved for it.
    #[error("Reservation failed for product {product_id}: {reason}")]
    ReservationFailed {
        /// Requested product
        product_id: ProductId,
        /// Underlying failure
        reason: String,
    },
}

impl ReservationError {
    /// HTTP-style status code for the boundary layer.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::ProductUnavailable { .. } => 404,
            Self::InsufficientCapacity { .. } | Self::ReservationFailed { .. } => 409,
            Self::QuantityExceedsAvailable { .. }
            | Self::InvalidQuantity
            | Self::ProductNotInCart { .. } => 400,
            Self::ServiceUnavailable(_) => 503,
            Self::OverRelease { .. } => 500,
        }
    }

    /// Returns `true` if retrying the same request later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_))
    }

    /// Short machine-readable name of the failure.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ProductUnavailable { .. } => "product_unavailable",
            Self::InsufficientCapacity { .. } => "insufficient_capacity",
            Self::QuantityExceedsAvailable { .. } => "quantity_exceeds_available",
            Self::InvalidQuantity => "invalid_quantity",
            Self::ProductNotInCart { .. } => "product_not_in_cart",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::OverRelease { .. } => "over_release",
            Self::ReservationFailed { .. } => "reservation_failed",
        }
    }
}

/// Errors raised by a reservation ledger backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Could not reach the backend.
    #[error("Ledger connection failed: {0}")]
    Connection(String),

    /// Backend rejected or failed a command.
    #[error("Ledger command failed: {0}")]
    Command(String),

    /// Stored value did not have the expected shape.
    #[error("Malformed ledger value at {key}: {reason}")]
    Malformed {
        /// Key holding the value
        key: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Errors raised by the durable stock store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockStoreError {
    /// Query failed.
    #[error("Stock store query failed: {0}")]
    Query(String),
}

/// Errors raised by the search index.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SearchIndexError {
    /// HTTP request failed.
    #[error("Search request failed: {0}")]
    Request(String),

    /// Index answered with an unexpected status.
    #[error("Search index error (status {status}): {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Response body could not be decoded.
    #[error("Search response parsing failed: {0}")]
    Parse(String),
}

impl From<LedgerError> for ReservationError {
    fn from(err: LedgerError) -> Self {
        Self::ServiceUnavailable(err.to_string())
    }
}

impl From<StockStoreError> for ReservationError {
    fn from(err: StockStoreError) -> Self {
        Self::ServiceUnavailable(err.to_string())
    }
}
