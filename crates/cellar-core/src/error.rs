//! # Error Types
//!
//! Domain-specific error types for cellar-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  cellar-core errors (this file)                                        │
//! │  ├── CoreError        - Stock rule violations                          │
//! │  └── ValidationError  - Malformed input                                │
//! │                                                                         │
//! │  cellar-db errors (separate crate)                                     │
//! │  └── DbError          - Storage failures + torn multi-row operations   │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → order service           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Expected vs Fatal
//! - `InsufficientStock`, `Validation`, `DuplicateRow`, `StockRowNotFound`,
//!   `QuantityOverflow`: expected, surfaced to the shopper or admin as a
//!   failed update.
//! - `InvariantViolation`: never expected. Always logged with full context
//!   and never retried.

use thiserror::Error;

use crate::reservation::LineStockState;
use crate::types::StockAction;

// =============================================================================
// Core Error
// =============================================================================

/// Stock rule errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// No stock row exists for the (product, warehouse) pair.
    ///
    /// Read paths report zero availability instead; only mutating paths
    /// return this. Rows are never created implicitly by a reservation.
    #[error("No stock row for product {product_id} in warehouse {warehouse_id}")]
    StockRowNotFound { product_id: i64, warehouse_id: i64 },

    /// Requested quantity exceeds what is available.
    ///
    /// ## User Workflow
    /// ```text
    /// Checkout (qty: 5)
    ///      │
    ///      ▼
    /// reserve: available=3
    ///      │
    ///      ▼
    /// InsufficientStock { available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// Storefront: "Only 3 left in this warehouse"
    /// ```
    #[error(
        "Insufficient stock for product {product_id} in warehouse {warehouse_id}: \
         available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: i64,
        warehouse_id: i64,
        available: i64,
        requested: i64,
    },

    /// An operation would break `0 <= reserved <= quantity`.
    ///
    /// Indicates a logic bug upstream (e.g. fulfilling more than was
    /// reserved). Silently clamping would hide an oversell.
    #[error(
        "Invariant violation on product {product_id} in warehouse {warehouse_id}: \
         {operation} of {attempted} with quantity {quantity}, reserved {reserved}"
    )]
    InvariantViolation {
        product_id: i64,
        warehouse_id: i64,
        operation: String,
        attempted: i64,
        quantity: i64,
        reserved: i64,
    },

    /// The resulting quantity would not fit in an `i64`.
    #[error(
        "Quantity of product {product_id} in warehouse {warehouse_id} would overflow: \
         {quantity} + {delta}"
    )]
    QuantityOverflow {
        product_id: i64,
        warehouse_id: i64,
        quantity: i64,
        delta: i64,
    },

        /// A stock row already exists for the pair.
    #[error("Stock row already exists for product {product_id} in warehouse {warehouse_id}")]
    DuplicateRow { product_id: i64, warehouse_id: i64 },

    /// A line's stock state does not allow the requested action.
    ///
    /// ## When This Occurs
    /// - Reserving an order twice
    /// - Confirming payment twice
    /// - Refunding twice
    #[error("Order {order_id} line {line_id} is {state}, cannot {action}")]
    IllegalTransition {
        order_id: i64,
        line_id: i64,
        state: LineStockState,
        action: StockAction,
    },

    /// The line's units already left (or came back to) the shelf; its
    /// placement can no longer be edited or removed.
    #[error("Order {order_id} line {line_id} is {state}, its stock can no longer change")]
    LineSettled {
        order_id: i64,
        line_id: i64,
        state: LineStockState,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Value must be strictly positive.
    #[error("{field} must be positive, got {value}")]
    MustBePositive { field: String, value: i64 },

    /// Value must not be negative.
    #[error("{field} must not be negative, got {value}")]
    Negative { field: String, value: i64 },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Transfer source and destination are the same warehouse.
    #[error("Cannot transfer within the same warehouse ({warehouse_id})")]
    SameWarehouse { warehouse_id: i64 },

    /// Manual adjustment would drop on-hand stock below what is reserved.
    #[error("Adjustment of {delta} would leave quantity {resulting} below reserved {reserved}")]
    BelowReserved {
        delta: i64,
        resulting: i64,
        reserved: i64,
    },

    /// Row still has units earmarked for orders.
    #[error("Stock row still has {reserved} reserved units")]
    ActiveReservations { reserved: i64 },

    /// A required free-text field is empty.
    #[error("{field} is required")]
    Required { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            product_id: 1,
            warehouse_id: 2,
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product 1 in warehouse 2: available 3, requested 5"
        );

        let err = CoreError::IllegalTransition {
            order_id: 5,
            line_id: 9,
            state: LineStockState::Fulfilled,
            action: StockAction::Confirm,
        };
        assert_eq!(err.to_string(), "Order 5 line 9 is fulfilled, cannot confirm");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::SameWarehouse { warehouse_id: 3 }.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }

    #[test]
    fn test_invariant_violation_message() {
        let err = CoreError::InvariantViolation {
            product_id: 1,
            warehouse_id: 1,
            operation: "fulfil".into(),
            attempted: 10,
            quantity: 10,
            reserved: 4,
        };
        assert!(err.to_string().contains("fulfil of 10"));
    }
}
