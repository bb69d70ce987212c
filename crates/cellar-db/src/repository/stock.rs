//! # Stock Ledger
//!
//! Owns the per-(product, warehouse) stock row. Every mutation is one SQLite
//! transaction against one row.
//!
//! ## Row Lock
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    reserve(product 1, warehouse 1, 30)                  │
//! │                                                                         │
//! │  BEGIN                                                                 │
//! │   │                                                                     │
//! │   ├── UPDATE stock_rows SET updated_at = updated_at                    │
//! │   │     WHERE (1, 1) RETURNING *        ← takes the write lock        │
//! │   │         │                             (second writer queues here) │
//! │   │         ▼                                                           │
//! │   │   StockRow { quantity: 100, reserved: 0 }                          │
//! │   │         │                                                           │
//! │   │         ▼                                                           │
//! │   ├── row.after_reserve(30)               ← pure rule in cellar-core  │
//! │   │         │ Err(InsufficientStock) ──► ROLLBACK                      │
//! │   │         ▼                                                           │
//! │   ├── UPDATE stock_rows SET reserved = 30 WHERE (1, 1)                 │
//! │   ├── INSERT INTO stock_movements (reserve, +30)                       │
//! │   │                                                                     │
//! │  COMMIT                                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The first statement of the transaction is a write, so SQLite acquires the
//! database write lock before the row is read. A competing `reserve` waits on
//! the busy handler and then reads the committed row. The two can never both
//! decide on the same stale `available`.
//!
//! ## Composition
//! The `*_in` functions run on a caller-supplied connection so the
//! reservation engine can commit a ledger change together with its own line
//! state. The public [`StockLedger`] methods wrap each in its own transaction.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, error, warn};

use crate::error::{DbError, DbResult};
use crate::repository::movement::{self, MovementContext};
use cellar_core::validation::{validate_delta, validate_non_negative, validate_quantity};
use cellar_core::{CoreError, MovementKind, StockLevel, StockRow};

// =============================================================================
// Row Primitives
// =============================================================================

/// Locks a row for the rest of the transaction and returns its current state.
///
/// Returns `None` when the pair has no row.
pub(crate) async fn lock_row(
    conn: &mut SqliteConnection,
    product_id: i64,
    warehouse_id: i64,
) -> DbResult<Option<StockRow>> {
    let row = sqlx::query_as::<_, StockRow>(
        r#"
        UPDATE stock_rows
        SET updated_at = updated_at
        WHERE product_id = ?1 AND warehouse_id = ?2
        RETURNING product_id, warehouse_id, quantity, reserved, updated_at
        "#,
    )
    .bind(product_id)
    .bind(warehouse_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row)
}

async fn lock_existing(
    conn: &mut SqliteConnection,
    product_id: i64,
    warehouse_id: i64,
) -> DbResult<StockRow> {
    lock_row(conn, product_id, warehouse_id)
        .await?
        .ok_or_else(|| {
            CoreError::StockRowNotFound {
                product_id,
                warehouse_id,
            }
            .into()
        })
}

/// Writes the new `(quantity, reserved)` of a locked row.
async fn store_row(conn: &mut SqliteConnection, next: &StockRow) -> DbResult<StockRow> {
    sqlx::query_as::<_, StockRow>(
        r#"
        UPDATE stock_rows
        SET quantity = ?3, reserved = ?4, updated_at = ?5
        WHERE product_id = ?1 AND warehouse_id = ?2
        RETURNING product_id, warehouse_id, quantity, reserved, updated_at
        "#,
    )
    .bind(next.product_id)
    .bind(next.warehouse_id)
    .bind(next.quantity)
    .bind(next.reserved)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        let err = DbError::from(e);
        if let DbError::CheckViolation(message) = &err {
            error!(
                product_id = next.product_id,
                warehouse_id = next.warehouse_id,
                quantity = next.quantity,
                reserved = next.reserved,
                message = %message,
                "SQLite refused a stock row write"
            );
        }
        err
    })
}

/// Converts a refused row transition, logging invariant violations.
fn refused(err: CoreError) -> DbError {
    if let CoreError::InvariantViolation {
        product_id,
        warehouse_id,
        operation,
        attempted,
        quantity,
        reserved,
    } = &err
    {
        error!(
            product_id = *product_id,
            warehouse_id = *warehouse_id,
            operation = %operation,
            attempted = *attempted,
            quantity = *quantity,
            reserved = *reserved,
            "Stock invariant violation"
        );
    }
    DbError::Domain(err)
}

// =============================================================================
// Connection-Level Operations
// =============================================================================

/// `reserved += qty` on the caller's transaction.
pub(crate) async fn reserve_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    warehouse_id: i64,
    qty: i64,
    ctx: &MovementContext,
) -> DbResult<StockRow> {
    validate_quantity(qty)?;

    let row = lock_existing(conn, product_id, warehouse_id).await?;
    let next = row.after_reserve(qty).map_err(refused)?;
    let stored = store_row(conn, &next).await?;
    movement::record(conn, product_id, warehouse_id, MovementKind::Reserve, 0, qty, ctx).await?;

    debug!(
        product_id,
        warehouse_id,
        qty,
        reserved = stored.reserved,
        available = stored.available(),
        "Reserved stock"
    );
    Ok(stored)
}

/// `reserved -= min(qty, reserved)` on the caller's transaction.
///
/// ## Returns
/// The row and the number of units actually released.
pub(crate) async fn release_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    warehouse_id: i64,
    qty: i64,
    ctx: &MovementContext,
) -> DbResult<(StockRow, i64)> {
    validate_non_negative("quantity", qty)?;

    let row = lock_existing(conn, product_id, warehouse_id).await?;
    let (next, released) = row.after_release(qty).map_err(refused)?;

    if released < qty {
        warn!(
            product_id,
            warehouse_id,
            requested = qty,
            released,
            order_id = ?ctx.order_id,
            "Release clamped to reserved units"
        );
    }

    if released == 0 {
        return Ok((row, 0));
    }

    let stored = store_row(conn, &next).await?;
    movement::record(
        conn,
        product_id,
        warehouse_id,
        MovementKind::Release,
        0,
        -released,
        ctx,
    )
    .await?;

    debug!(product_id, warehouse_id, qty = released, reserved = stored.reserved, "Released stock");
    Ok((stored, released))
}

/// `quantity -= qty; reserved -= qty` on the caller's transaction.
pub(crate) async fn fulfil_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    warehouse_id: i64,
    qty: i64,
    ctx: &MovementContext,
) -> DbResult<StockRow> {
    validate_quantity(qty)?;

    let row = lock_existing(conn, product_id, warehouse_id).await?;
    let next = row.after_fulfil(qty).map_err(refused)?;
    let stored = store_row(conn, &next).await?;
    movement::record(
        conn,
        product_id,
        warehouse_id,
        MovementKind::Fulfil,
        -qty,
        -qty,
        ctx,
    )
    .await?;

    debug!(
        product_id,
        warehouse_id,
        qty,
        quantity = stored.quantity,
        reserved = stored.reserved,
        "Fulfilled stock"
    );
    Ok(stored)
}

/// `quantity += qty` on the caller's transaction.
pub(crate) async fn restock_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    warehouse_id: i64,
    qty: i64,
    ctx: &MovementContext,
) -> DbResult<StockRow> {
    validate_non_negative("quantity", qty)?;

    let row = lock_existing(conn, product_id, warehouse_id).await?;
    if qty == 0 {
        return Ok(row);
    }

    let next = row.after_restock(qty).map_err(refused)?;
    let stored = store_row(conn, &next).await?;
    movement::record(
        conn,
        product_id,
        warehouse_id,
        MovementKind::Restock,
        qty,
        0,
        ctx,
    )
    .await?;

    debug!(product_id, warehouse_id, qty, quantity = stored.quantity, "Restocked");
    Ok(stored)
}

/// `quantity += delta`, refused below `reserved`, on the caller's transaction.
pub(crate) async fn adjust_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    warehouse_id: i64,
    delta: i64,
    ctx: &MovementContext,
) -> DbResult<StockRow> {
    validate_delta(delta)?;

    let row = lock_existing(conn, product_id, warehouse_id).await?;
    let next = row.after_adjust(delta).map_err(refused)?;
    let stored = store_row(conn, &next).await?;
    movement::record(
        conn,
        product_id,
        warehouse_id,
        MovementKind::Adjust,
        delta,
        0,
        ctx,
    )
    .await?;

    debug!(product_id, warehouse_id, delta, quantity = stored.quantity, "Adjusted quantity");
    Ok(stored)
}

/// Transfer source leg: `quantity -= qty`, only from unreserved units.
pub(crate) async fn withdraw_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    warehouse_id: i64,
    qty: i64,
    ctx: &MovementContext,
) -> DbResult<StockRow> {
    validate_quantity(qty)?;

    let row = lock_existing(conn, product_id, warehouse_id).await?;
    let next = row.after_withdraw(qty).map_err(refused)?;
    let stored = store_row(conn, &next).await?;
    movement::record(
        conn,
        product_id,
        warehouse_id,
        MovementKind::TransferOut,
        -qty,
        0,
        ctx,
    )
    .await?;

    debug!(product_id, warehouse_id, qty, quantity = stored.quantity, "Transferred stock out");
    Ok(stored)
}

/// Transfer destination leg: `quantity += qty`, creating the row if absent.
pub(crate) async fn credit_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    warehouse_id: i64,
    qty: i64,
    ctx: &MovementContext,
) -> DbResult<StockRow> {
    validate_quantity(qty)?;

    let stored = match lock_row(conn, product_id, warehouse_id).await? {
        Some(row) => {
            let next = row.after_restock(qty).map_err(refused)?;
            store_row(conn, &next).await?
        }
        None => {
            sqlx::query_as::<_, StockRow>(
                r#"
                INSERT INTO stock_rows (product_id, warehouse_id, quantity, reserved, updated_at)
                VALUES (?1, ?2, ?3, 0, ?4)
                RETURNING product_id, warehouse_id, quantity, reserved, updated_at
                "#,
            )
            .bind(product_id)
            .bind(warehouse_id)
            .bind(qty)
            .bind(Utc::now())
            .fetch_one(&mut *conn)
            .await?
        }
    };

    movement::record(
        conn,
        product_id,
        warehouse_id,
        MovementKind::TransferIn,
        qty,
        0,
        ctx,
    )
    .await?;

    debug!(product_id, warehouse_id, qty, quantity = stored.quantity, "Transferred stock in");
    Ok(stored)
}

// =============================================================================
// Ledger
// =============================================================================

/// Atomic per-row stock operations.
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
}

impl StockLedger {
    /// Creates a new StockLedger.
    pub fn new(pool: SqlitePool) -> Self {
        StockLedger { pool }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Returns `(quantity, reserved, available)` for a pair.
    ///
    /// A pair with no row is out of stock, not an error.
    pub async fn get_available(&self, product_id: i64, warehouse_id: i64) -> DbResult<StockLevel> {
        Ok(self
            .get_row(product_id, warehouse_id)
            .await?
            .map(|row| row.level())
            .unwrap_or(StockLevel::OUT_OF_STOCK))
    }

    /// Gets the row for a pair.
    pub async fn get_row(&self, product_id: i64, warehouse_id: i64) -> DbResult<Option<StockRow>> {
        let row = sqlx::query_as::<_, StockRow>(
            r#"
            SELECT product_id, warehouse_id, quantity, reserved, updated_at
            FROM stock_rows
            WHERE product_id = ?1 AND warehouse_id = ?2
            "#,
        )
        .bind(product_id)
        .bind(warehouse_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Every warehouse row for a product, ordered by warehouse.
    pub async fn rows_for_product(&self, product_id: i64) -> DbResult<Vec<StockRow>> {
        let rows = sqlx::query_as::<_, StockRow>(
            r#"
            SELECT product_id, warehouse_id, quantity, reserved, updated_at
            FROM stock_rows
            WHERE product_id = ?1
            ORDER BY warehouse_id
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Product stock summed across warehouses.
    pub async fn total_available(&self, product_id: i64) -> DbResult<StockLevel> {
        let total = self
            .rows_for_product(product_id)
            .await?
            .iter()
            .map(StockRow::level)
            .fold(StockLevel::OUT_OF_STOCK, |acc, level| acc + level);

        Ok(total)
    }

    /// Warehouse with the most available units, if any can cover `qty`.
    ///
    /// Ties go to the lowest warehouse id. This is a hint: the answer can be
    /// stale by the time the caller reserves.
    pub async fn suggest_warehouse(&self, product_id: i64, qty: i64) -> DbResult<Option<i64>> {
        validate_quantity(qty)?;

        let warehouse_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT warehouse_id
            FROM stock_rows
            WHERE product_id = ?1 AND quantity - reserved >= ?2
            ORDER BY quantity - reserved DESC, warehouse_id ASC
            LIMIT 1
            "#,
        )
        .bind(product_id)
        .bind(qty)
        .fetch_optional(&self.pool)
        .await?;

        Ok(warehouse_id)
    }

    /// Rows with `available <= threshold`, lowest first.
    pub async fn low_stock(&self, threshold: i64) -> DbResult<Vec<StockRow>> {
        validate_non_negative("threshold", threshold)?;

        let rows = sqlx::query_as::<_, StockRow>(
            r#"
            SELECT product_id, warehouse_id, quantity, reserved, updated_at
            FROM stock_rows
            WHERE quantity - reserved <= ?1
            ORDER BY quantity - reserved ASC, product_id ASC, warehouse_id ASC
            "#,
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;

        debug!(threshold, count = rows.len(), "Low stock report");
        Ok(rows)
    }

    /// Rows breaking `0 <= reserved <= quantity`. Empty in a healthy database.
    pub async fn check_invariants(&self) -> DbResult<Vec<StockRow>> {
        let rows = sqlx::query_as::<_, StockRow>(
            r#"
            SELECT product_id, warehouse_id, quantity, reserved, updated_at
            FROM stock_rows
            WHERE quantity < 0 OR reserved < 0 OR reserved > quantity
            ORDER BY product_id, warehouse_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            error!(
                product_id = row.product_id,
                warehouse_id = row.warehouse_id,
                quantity = row.quantity,
                reserved = row.reserved,
                "Stock row breaks reserved <= quantity"
            );
        }

        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// `reserved += qty`.
    ///
    /// ## Errors
    /// - `InsufficientStock` if `available < qty`
    /// - `StockRowNotFound` if the pair has no row
    pub async fn reserve(&self, product_id: i64, warehouse_id: i64, qty: i64) -> DbResult<StockRow> {
        let mut tx = self.pool.begin().await?;
        let row = reserve_in(&mut tx, product_id, warehouse_id, qty, &MovementContext::default()).await?;
        tx.commit().await?;
        Ok(row)
    }

    /// `reserved -= min(qty, reserved)`. Over-release is clamped.
    pub async fn release(&self, product_id: i64, warehouse_id: i64, qty: i64) -> DbResult<StockRow> {
        let mut tx = self.pool.begin().await?;
        let (row, _) =
            release_in(&mut tx, product_id, warehouse_id, qty, &MovementContext::default()).await?;
        tx.commit().await?;
        Ok(row)
    }

    /// `quantity -= qty; reserved -= qty`.
    ///
    /// ## Errors
    /// `InvariantViolation` (fatal) if `reserved < qty`.
    pub async fn fulfil(&self, product_id: i64, warehouse_id: i64, qty: i64) -> DbResult<StockRow> {
        let mut tx = self.pool.begin().await?;
        let row = fulfil_in(&mut tx, product_id, warehouse_id, qty, &MovementContext::default()).await?;
        tx.commit().await?;
        Ok(row)
    }

    /// `quantity += qty`.
    pub async fn restock(&self, product_id: i64, warehouse_id: i64, qty: i64) -> DbResult<StockRow> {
        let mut tx = self.pool.begin().await?;
        let row = restock_in(&mut tx, product_id, warehouse_id, qty, &MovementContext::default()).await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Manual correction of `quantity`.
    ///
    /// ## Errors
    /// `ValidationError::BelowReserved` if `quantity + delta < reserved`.
    pub async fn adjust_quantity(
        &self,
        product_id: i64,
        warehouse_id: i64,
        delta: i64,
    ) -> DbResult<StockRow> {
        self.adjust_with(product_id, warehouse_id, delta, &MovementContext::default())
            .await
    }

    /// `adjust_quantity` with a journal context.
    pub async fn adjust_with(
        &self,
        product_id: i64,
        warehouse_id: i64,
        delta: i64,
        ctx: &MovementContext,
    ) -> DbResult<StockRow> {
        let mut tx = self.pool.begin().await?;
        let row = adjust_in(&mut tx, product_id, warehouse_id, delta, ctx).await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Creates a row with `initial_quantity` on hand and nothing reserved.
    ///
    /// ## Errors
    /// `DuplicateRow` if the pair already has a row.
    pub async fn create_row(
        &self,
        product_id: i64,
        warehouse_id: i64,
        initial_quantity: i64,
    ) -> DbResult<StockRow> {
        validate_non_negative("initial_quantity", initial_quantity)?;

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, StockRow>(
            r#"
            INSERT INTO stock_rows (product_id, warehouse_id, quantity, reserved, updated_at)
            VALUES (?1, ?2, ?3, 0, ?4)
            RETURNING product_id, warehouse_id, quantity, reserved, updated_at
            "#,
        )
        .bind(product_id)
        .bind(warehouse_id)
        .bind(initial_quantity)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::Domain(CoreError::DuplicateRow {
                product_id,
                warehouse_id,
            }),
            other => other,
        })?;

        movement::record(
            &mut tx,
            product_id,
            warehouse_id,
            MovementKind::Create,
            initial_quantity,
            0,
            &MovementContext::default(),
        )
        .await?;

        tx.commit().await?;

        debug!(product_id, warehouse_id, qty = initial_quantity, "Created stock row");
        Ok(row)
    }

    /// Deletes a row.
    ///
    /// ## Errors
    /// `ValidationError::ActiveReservations` if `reserved > 0`.
    pub async fn delete_row(&self, product_id: i64, warehouse_id: i64) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = lock_existing(&mut tx, product_id, warehouse_id).await?;
        row.ensure_deletable()?;

        sqlx::query("DELETE FROM stock_rows WHERE product_id = ?1 AND warehouse_id = ?2")
            .bind(product_id)
            .bind(warehouse_id)
            .execute(&mut *tx)
            .await?;

        movement::record(
            &mut tx,
            product_id,
            warehouse_id,
            MovementKind::Delete,
            -row.quantity,
            0,
            &MovementContext::default(),
        )
        .await?;

        tx.commit().await?;

        debug!(product_id, warehouse_id, quantity = row.quantity, "Deleted stock row");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
