//! # Validation Module
//!
//! Input checks run before any stock row is touched.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Order / warehouse service                                    │
//! │  └── Field formats, ownership, auth                                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Positive quantities                                               │
//! │  └── Transfer endpoints differ                                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Stock ledger (row locked for the whole transaction)          │
//! │  └── available / reserved checks, atomic with the write                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 4: SQLite CHECK (0 <= reserved <= quantity)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Anything that depends on the current row contents (available stock,
//! reserved count) is NOT checked here: a check-then-write across two
//! statements would race. Those checks run on the row the ledger has locked.

use crate::error::ValidationError;
use crate::MAX_LINE_QUANTITY;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates a quantity that must be strictly positive.
///
/// ## Example
/// ```rust
/// use cellar_core::validation::validate_quantity;
///
/// assert!(validate_quantity(30).is_ok());
/// assert!(validate_quantity(0).is_err());
/// assert!(validate_quantity(-3).is_err());
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
            value: qty,
        });
    }

    Ok(())
}

/// Validates the quantity of an order line.
///
/// Positive, and at most [`MAX_LINE_QUANTITY`]: a shopper's line of a
/// million bottles is a typo. Ledger calls (restock, stocking a new row,
/// manual adjustments) are not capped.
pub fn validate_line_quantity(qty: i64) -> ValidationResult<()> {
    validate_quantity(qty)?;

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "line quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a quantity that may be zero (restock, initial stock).
pub fn validate_non_negative(field: &str, qty: i64) -> ValidationResult<()> {
    if qty < 0 {
        return Err(ValidationError::Negative {
            field: field.to_string(),
            value: qty,
        });
    }

    Ok(())
}

/// Validates a manual adjustment delta.
///
/// Zero is rejected: an adjustment that changes nothing is almost always
/// a form submitted by mistake and would still write a journal entry.
pub fn validate_delta(delta: i64) -> ValidationResult<()> {
    if delta == 0 {
        return Err(ValidationError::MustBePositive {
            field: "delta magnitude".to_string(),
            value: 0,
        });
    }

    Ok(())
}

/// Validates transfer endpoints and quantity.
///
/// ## Example
/// ```rust
/// use cellar_core::validation::validate_transfer;
///
/// assert!(validate_transfer(1, 2, 10).is_ok());
/// assert!(validate_transfer(1, 1, 10).is_err());
/// ```
pub fn validate_transfer(from_warehouse: i64, to_warehouse: i64, qty: i64) -> ValidationResult<()> {
    if from_warehouse == to_warehouse {
        return Err(ValidationError::SameWarehouse {
            warehouse_id: from_warehouse,
        });
    }

    validate_quantity(qty)
}

/// Validates the free-text reason attached to manual stock movements.
///
/// ## Returns
/// The trimmed reason.
pub fn validate_reason(reason: &str) -> ValidationResult<String> {
    let reason = reason.trim();

    if reason.is_empty() {
        return Err(ValidationError::Required {
            field: "reason".to_string(),
        });
    }

    Ok(reason.to_string())
}

// =============================================================================
// Unit Tests
// =============================================================================
