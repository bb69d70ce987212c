//! # Storage Errors
//!
//! [`DbError`] is what every public call in this crate returns.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ValidationError ──► CoreError ──┐                                      │
//! │                                  ├──► DbError ──► order / admin service │
//! │  sqlx::Error (classified) ───────┘        │                             │
//! │                                           └── TransferIncomplete,       │
//! │                                               ReassignmentIncomplete    │
//! │                                               (raised here, torn state) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fatal Errors
//! [`DbError::is_fatal`] is true for invariant violations and for the two
//! torn multi-row states (`TransferIncomplete`, `ReassignmentIncomplete`).
//! These are logged at `error` level where they arise and must never be
//! retried automatically.

use thiserror::Error;

use cellar_core::{CoreError, ValidationError};

/// Ledger and storage errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Stock rule refused the operation (not found, insufficient stock,
    /// invariant violation, duplicate row, illegal line transition, validation).
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Transfer debited the source but could not credit the destination.
    ///
    /// ## Recovery
    /// Manual: the units are missing from both warehouses until someone
    /// restocks the destination. The journal entry for the source leg
    /// carries `correlation_id`.
    #[error(
        "Transfer {correlation_id} of {quantity} units of product {product_id} left \
         warehouse {from_warehouse} but never reached warehouse {to_warehouse}: {source}"
    )]
    TransferIncomplete {
        correlation_id: String,
        product_id: i64,
        from_warehouse: i64,
        to_warehouse: i64,
        quantity: i64,
        #[source]
        source: Box<DbError>,
    },

    /// Line warehouse change released the old reservation but could not
    /// reserve in the new warehouse. The line now holds no reservation.
    #[error(
        "Order {order_id} line {line_id} released {released} units from warehouse \
         {released_from} but could not reserve in warehouse {target_warehouse}: {source}"
    )]
    ReassignmentIncomplete {
        order_id: i64,
        line_id: i64,
        released_from: i64,
        released: i64,
        target_warehouse: i64,
        #[source]
        source: Box<DbError>,
    },

    /// One line of an order could not be reserved. The order's other
    /// reservations from the same call were released again.
    #[error("Order {order_id} line {line_id}: {source}")]
    LineRejected {
        order_id: i64,
        line_id: i64,
        #[source]
        source: Box<DbError>,
    },

    /// A UNIQUE constraint refused an insert (`table.column, ...`).
    #[error("Unique constraint failed on {columns}")]
    UniqueViolation { columns: String },

    /// A CHECK constraint refused a write (e.g. `reserved <= quantity`).
    ///
    /// ## When This Occurs
    /// Only if a write bypassed the ledger's own checks. Treated as fatal.
    #[error("Check constraint failed: {0}")]
    CheckViolation(String),

    /// The database file could not be opened.
    #[error("Cannot open stock database: {0}")]
    ConnectionFailed(String),

    /// An embedded migration did not apply.
    #[error("Schema migration failed: {0}")]
    MigrationFailed(String),

    /// No pooled connection became free within the acquire timeout.
    #[error("Timed out waiting for a database connection")]
    PoolExhausted,

    /// Configuration could not be loaded or is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Any other SQLite or driver failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl DbError {
    /// Returns the stock rule error, if this is one.
    pub fn as_domain(&self) -> Option<&CoreError> {
        match self {
            DbError::Domain(err) => Some(err),
            DbError::LineRejected { source, .. } => source.as_domain(),
            _ => None,
        }
    }

    /// The order line whose reservation failed, if any.
    pub fn failed_line(&self) -> Option<i64> {
        match self {
            DbError::LineRejected { line_id, .. } => Some(*line_id),
            DbError::Domain(CoreError::IllegalTransition { line_id, .. }) => Some(*line_id),
            _ => None,
        }
    }

    /// True when the caller asked for more than is available.
    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self.as_domain(), Some(CoreError::InsufficientStock { .. }))
    }

    /// True when no stock row exists for the pair.
    pub fn is_not_found(&self) -> bool {
        matches!(self.as_domain(), Some(CoreError::StockRowNotFound { .. }))
    }

    /// True for data-integrity failures that must abort the business
    /// operation and be reconciled by hand.
    pub fn is_fatal(&self) -> bool {
        match self {
            DbError::Domain(CoreError::InvariantViolation { .. })
            | DbError::CheckViolation(_)
            | DbError::TransferIncomplete { .. }
            | DbError::ReassignmentIncomplete { .. } => true,
            DbError::LineRejected { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::Domain(CoreError::Validation(err))
    }
}

/// Classifies driver errors.
///
/// ```text
/// "UNIQUE constraint failed: stock_rows.product_id, ..."  → UniqueViolation
/// "CHECK constraint failed: reserved <= quantity"        → CheckViolation
/// PoolTimedOut                                          → PoolExhausted
/// anything else                                         → Storage
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let msg = db_err.message();
            if let Some(columns) = msg.strip_prefix("UNIQUE constraint failed: ") {
                return DbError::UniqueViolation {
                    columns: columns.to_string(),
                };
            }
            if msg.starts_with("CHECK constraint failed") {
                return DbError::CheckViolation(msg.to_string());
            }
        }

        match err {
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            other => DbError::Storage(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result of every ledger, engine and storage call.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err: DbError = CoreError::InsufficientStock {
            product_id: 1,
            warehouse_id: 1,
            available: 0,
            requested: 1,
        }
        .into();
        assert!(err.is_insufficient_stock());
        assert!(!err.is_fatal());

        let err: DbError = CoreError::InvariantViolation {
            product_id: 1,
            warehouse_id: 1,
            operation: "fulfil".into(),
            attempted: 2,
            quantity: 5,
            reserved: 1,
        }
        .into();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_torn_transfer_is_fatal_and_keeps_cause() {
        let err = DbError::TransferIncomplete {
            correlation_id: "t-1".into(),
            product_id: 1,
            from_warehouse: 1,
            to_warehouse: 2,
            quantity: 10,
            source: Box::new(DbError::PoolExhausted),
        };
        assert!(err.is_fatal());
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("never reached warehouse 2"));
    }

    #[test]
    fn test_rejected_line_keeps_cause() {
        let err = DbError::LineRejected {
            order_id: 5,
            line_id: 12,
            source: Box::new(
                CoreError::InsufficientStock {
                    product_id: 1,
                    warehouse_id: 1,
                    available: 40,
                    requested: 60,
                }
                .into(),
            ),
        };
        assert_eq!(err.failed_line(), Some(12));
        assert!(err.is_insufficient_stock());
        assert!(!err.is_fatal());
        assert!(err.to_string().starts_with("Order 5 line 12: "));
    }

    #[test]
    fn test_validation_converts() {
        let err: DbError = ValidationError::SameWarehouse { warehouse_id: 4 }.into();
        assert!(matches!(
            err.as_domain(),
            Some(CoreError::Validation(ValidationError::SameWarehouse { warehouse_id: 4 }))
        ));
    }
}
