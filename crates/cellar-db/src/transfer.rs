//! # Warehouse Transfers and Adjustments
//!
//! Manual stock movements that are not driven by an order.
//!
//! ## Transfer Legs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  transfer(product 1, A → B, 10, "rebalance")                           │
//! │                                                                         │
//! │  correlation_id = uuid v4                                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  tx 1: A.quantity -= 10   (only unreserved units)   journal: transfer_out
//! │       │ InsufficientStock / NotFound ──► nothing changed, Err          │
//! │       ▼                                                                 │
//! │  ─ ─ ─ ─ exposure window: 10 units in neither warehouse ─ ─ ─ ─        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  tx 2: B.quantity += 10   (row created if absent)   journal: transfer_in
//! │       │ any failure ──► error! + TransferIncomplete (never retried)    │
//! │       ▼                                                                 │
//! │  TransferReceipt                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both journal entries carry the same `correlation_id`, so a torn transfer
//! can be found with [`MovementRepository::list_correlated`].
//!
//! [`MovementRepository::list_correlated`]: crate::repository::movement::MovementRepository::list_correlated

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::movement::MovementContext;
use crate::repository::stock;
use cellar_core::validation::{validate_reason, validate_transfer};
use cellar_core::StockRow;

/// Both rows after a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub correlation_id: String,
    pub quantity: i64,
    pub from: StockRow,
    pub to: StockRow,
}

/// Manual transfers between warehouses and quantity corrections.
#[derive(Debug, Clone)]
pub struct WarehouseTransfers {
    pool: SqlitePool,
}

impl WarehouseTransfers {
    /// Creates a new WarehouseTransfers.
    pub fn new(pool: SqlitePool) -> Self {
        WarehouseTransfers { pool }
    }

    /// Moves `qty` unreserved units of a product from one warehouse to another.
    ///
    /// ## Errors
    /// - `ValidationError` if `from == to`, `qty <= 0` or `reason` is blank
    /// - `InsufficientStock` if `available(from) < qty`; nothing changed
    /// - `StockRowNotFound` if `from` has no row; nothing changed
    /// - `TransferIncomplete` (fatal) if the source was debited but the
    ///   destination could not be credited
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        product_id: i64,
        from_warehouse: i64,
        to_warehouse: i64,
        qty: i64,
        reason: &str,
    ) -> DbResult<TransferReceipt> {
        validate_transfer(from_warehouse, to_warehouse, qty)?;
        let reason = validate_reason(reason)?;

        let correlation_id = Uuid::new_v4().to_string();
        let ctx = MovementContext::manual(reason).correlated(correlation_id.clone());

        let mut tx = self.pool.begin().await?;
        let from = stock::withdraw_in(&mut tx, product_id, from_warehouse, qty, &ctx).await?;
        tx.commit().await?;

        let credited = async {
            let mut tx = self.pool.begin().await?;
            let row = stock::credit_in(&mut tx, product_id, to_warehouse, qty, &ctx).await?;
            tx.commit().await?;
            Ok::<_, DbError>(row)
        }
        .await;

        let to = match credited {
            Ok(row) => row,
            Err(source) => {
                error!(
                    correlation_id = %correlation_id,
                    product_id,
                    from_warehouse,
                    to_warehouse,
                    qty,
                    error = %source,
                    "Transfer left the source warehouse but was not credited"
                );
                return Err(DbError::TransferIncomplete {
                    correlation_id,
                    product_id,
                    from_warehouse,
                    to_warehouse,
                    quantity: qty,
                    source: Box::new(source),
                });
            }
        };

        info!(
            correlation_id = %correlation_id,
            from_quantity = from.quantity,
            to_quantity = to.quantity,
            "Stock transferred"
        );

        Ok(TransferReceipt {
            correlation_id,
            quantity: qty,
            from,
            to,
        })
    }

    /// Manual correction of on-hand stock (count discrepancy, breakage).
    ///
    /// ## Errors
    /// `ValidationError::BelowReserved` if the result would drop below the
    /// reserved units.
    #[instrument(skip(self))]
    pub async fn adjust(
        &self,
        product_id: i64,
        warehouse_id: i64,
        delta: i64,
        reason: &str,
    ) -> DbResult<StockRow> {
        let reason = validate_reason(reason)?;

        let row = stock::StockLedger::new(self.pool.clone())
            .adjust_with(product_id, warehouse_id, delta, &MovementContext::manual(reason))
            .await?;

        info!(quantity = row.quantity, "Stock adjusted");
        Ok(row)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use cellar_core::{CoreError, MovementKind, ValidationError};

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.ledger().create_row(1, 1, 10).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_transfer_creates_destination() {
        let db = setup().await;

        let receipt = db.transfers().transfer(1, 1, 2, 10, "rebalance").await.unwrap();
        assert_eq!(receipt.from.quantity, 0);
        assert_eq!(receipt.to.quantity, 10);
        assert_eq!(db.ledger().get_available(1, 2).await.unwrap().available, 10);

        let legs = db
            .movements()
            .list_correlated(&receipt.correlation_id)
            .await
            .unwrap();
        let kinds: Vec<_> = legs.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MovementKind::TransferOut, MovementKind::TransferIn]);
        assert_eq!(legs[0].reason.as_deref(), Some("rebalance"));
    }

    #[tokio::test]
    async fn test_transfer_adds_to_existing_destination() {
        let db = setup().await;
        db.ledger().create_row(1, 2, 5).await.unwrap();

        db.transfers().transfer(1, 1, 2, 4, "rebalance").await.unwrap();
        assert_eq!(db.ledger().get_available(1, 1).await.unwrap().quantity, 6);
        assert_eq!(db.ledger().get_available(1, 2).await.unwrap().quantity, 9);
    }

    #[tokio::test]
    async fn test_transfer_too_much_changes_nothing() {
        let db = setup().await;

        let err = db
            .transfers()
            .transfer(1, 1, 2, 11, "rebalance")
            .await
            .unwrap_err();
        assert!(err.is_insufficient_stock());
        assert_eq!(db.ledger().get_available(1, 1).await.unwrap().quantity, 10);
        assert!(db.ledger().get_row(1, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_credit_leaves_transfer_incomplete() {
        let db = setup().await;
        sqlx::query(
            r#"
            CREATE TRIGGER refuse_transfer_in BEFORE INSERT ON stock_movements
            WHEN NEW.kind = 'transfer_in'
            BEGIN
                SELECT RAISE(ABORT, 'credit refused');
            END
            "#,
        )
        .execute(db.pool())
        .await
        .unwrap();

        let err = db.transfers().transfer(1, 1, 2, 4, "rebalance").await.unwrap_err();
        assert!(err.is_fatal());
        let correlation_id = match &err {
            DbError::TransferIncomplete {
                correlation_id,
                quantity: 4,
                to_warehouse: 2,
                ..
            } => correlation_id.clone(),
            other => panic!("expected TransferIncomplete, got {other:?}"),
        };

        assert_eq!(db.ledger().get_available(1, 1).await.unwrap().quantity, 6);
        assert!(db.ledger().get_row(1, 2).await.unwrap().is_none());

        let legs = db.movements().list_correlated(&correlation_id).await.unwrap();
        let kinds: Vec<_> = legs.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MovementKind::TransferOut]);
    }

    #[tokio::test]
    async fn test_transfer_cannot_take_reserved_units() {
        let db = setup().await;
        db.ledger().reserve(1, 1, 3).await.unwrap();

        let err = db.transfers().transfer(1, 1, 2, 8, "rebalance").await.unwrap_err();
        assert!(err.is_insufficient_stock());
    }

    #[tokio::test]
    async fn test_transfer_validation() {
        let db = setup().await;
        let transfers = db.transfers();

        let err = transfers.transfer(1, 1, 1, 5, "rebalance").await.unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(CoreError::Validation(ValidationError::SameWarehouse { warehouse_id: 1 }))
        ));

        let err = transfers.transfer(1, 1, 2, 5, "  ").await.unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(CoreError::Validation(ValidationError::Required { .. }))
        ));
    }

    #[tokio::test]
    async fn test_adjust_with_reason() {
        let db = setup().await;

        let row = db.transfers().adjust(1, 1, -2, "breakage").await.unwrap();
        assert_eq!(row.quantity, 8);

        let latest = db.movements().list_for_row(1, 1, 1).await.unwrap();
        assert_eq!(latest[0].kind, MovementKind::Adjust);
        assert_eq!(latest[0].reason.as_deref(), Some("breakage"));
    }
}
