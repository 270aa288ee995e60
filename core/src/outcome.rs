//! Structured outcomes of cart operations.

use crate::error::ReservationError;
use serde::{Deserialize, Serialize};

/// Successful cart mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartOutcome {
    /// HTTP-style status (always 200 for success)
    pub status_code: u16,
    /// Human-readable message
    pub message: String,
}

impl CartOutcome {
    /// Build a success outcome with the given message.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status_code: 200,
            message: message.into(),
        }
    }
}

/// Flat rendering of an operation result for the boundary layer.
///
/// Mirrors the `{ is_success, status_code, message }` shape HTTP handlers
/// return to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartResponse {
    /// Whether the operation succeeded
    pub is_success: bool,
    /// HTTP-style status code
    pub status_code: u16,
    /// Machine-readable failure kind (absent on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human-readable message
    pub message: String,
}

impl From<Result<CartOutcome, ReservationError>> for CartResponse {
    fn from(result: Result<CartOutcome, ReservationError>) -> Self {
        match result {
            Ok(outcome) => Self {
                is_success: true,
                status_code: outcome.status_code,
                error: None,
                message: outcome.message,
            },
            Err(err) => Self {
                is_success: false,
                status_code: err.status_code(),
                error: Some(err.kind().to_string()),
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProductId;

    #[test]
    fn failure_renders_status_and_message() {
        let response = CartResponse::from(Err(ReservationError::InsufficientCapacity {
            product_id: ProductId(3),
            requested: 2,
            available: 0,
        }));
        assert!(!response.is_success);
        assert_eq!(response.status_code, 409);
        assert_eq!(response.error.as_deref(), Some("insufficient_capacity"));
    }

    #[test]
    fn success_serializes_without_error_field() {
        let response = CartResponse::from(Ok(CartOutcome::ok("Goods added to cart successfully")));
        let json = serde_json::to_value(&response).unwrap_or_default();
        assert_eq!(json["is_success"], true);
        assert!(json.get("error").is_none());
    }
}
