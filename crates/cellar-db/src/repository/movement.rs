//! # Movement Journal
//!
//! Append-only record of every change to a stock row.
//!
//! ## Same-Transaction Write
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   SINGLE TRANSACTION                                    │
//! │                                                                         │
//! │  1. UPDATE stock_rows SET reserved = 30 WHERE (product, warehouse)     │
//! │                                                                         │
//! │  2. INSERT INTO stock_movements (kind = 'reserve', reserved_delta = 30,│
//! │                                 order_id = 5)                           │
//! │                                                                         │
//! │  COMMIT ← both or neither                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The journal is what an operator reads when reconciling a torn transfer
//! or a failed warehouse reassignment: both legs of a transfer share a
//! `correlation_id`, and order-driven movements carry the `order_id`.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use cellar_core::{MovementKind, StockMovement};

const MOVEMENT_COLUMNS: &str = "id, product_id, warehouse_id, kind, quantity_delta, \
     reserved_delta, order_id, reason, correlation_id, created_at";

// =============================================================================
// Movement Context
// =============================================================================

/// Who asked for a movement and why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementContext {
    pub order_id: Option<i64>,
    pub reason: Option<String>,
    pub correlation_id: Option<String>,
}

impl MovementContext {
    /// Movement triggered by an order.
    pub fn for_order(order_id: i64) -> Self {
        MovementContext {
            order_id: Some(order_id),
            ..Default::default()
        }
    }

    /// Manual movement with a reason.
    pub fn manual(reason: impl Into<String>) -> Self {
        MovementContext {
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Ties this movement to others in the same multi-row operation.
    pub fn correlated(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Appends a journal entry on the caller's transaction.
pub(crate) async fn record(
    conn: &mut SqliteConnection,
    product_id: i64,
    warehouse_id: i64,
    kind: MovementKind,
    quantity_delta: i64,
    reserved_delta: i64,
    ctx: &MovementContext,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            product_id, warehouse_id, kind,
            quantity_delta, reserved_delta,
            order_id, reason, correlation_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(product_id)
    .bind(warehouse_id)
    .bind(kind)
    .bind(quantity_delta)
    .bind(reserved_delta)
    .bind(ctx.order_id)
    .bind(ctx.reason.as_deref())
    .bind(ctx.correlation_id.as_deref())
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Read access to the movement journal.
#[derive(Debug, Clone)]
pub struct MovementRepository {
    pool: SqlitePool,
}

impl MovementRepository {
    /// Creates a new MovementRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MovementRepository { pool }
    }

    /// Latest movements for one stock row, newest first.
    pub async fn list_for_row(
        &self,
        product_id: i64,
        warehouse_id: i64,
        limit: u32,
    ) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE product_id = ?1 AND warehouse_id = ?2 \
             ORDER BY id DESC LIMIT ?3"
        );

        let movements = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(product_id)
            .bind(warehouse_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(movements)
    }

    /// Every movement an order caused, in the order they happened.
    pub async fn list_for_order(&self, order_id: i64) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE order_id = ?1 ORDER BY id"
        );

        let movements = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(movements)
    }

    /// Both legs (or the single surviving leg) of a transfer.
    pub async fn list_correlated(&self, correlation_id: &str) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE correlation_id = ?1 ORDER BY id"
        );

        let movements = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(correlation_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(movements)
    }
}
