//! # Line Stock Tracking
//!
//! `order_line_stock` records, per order line, where the engine reserved
//! stock and what state that stock is in. Every write here shares a
//! transaction with the ledger change it describes.
//!
//! Like the ledger, the functions that mutate lock the line with a write as
//! the first statement, so two callers acting on the same line (a double
//! confirm, an edit racing a cancel) run one after the other.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use cellar_core::{LineStockState, PlannedLine, TrackedLine};

/// All tracked lines of an order.
pub(crate) async fn load_order(pool: &SqlitePool, order_id: i64) -> DbResult<Vec<TrackedLine>> {
    let lines = sqlx::query_as::<_, TrackedLine>(
        r#"
        SELECT order_id, line_id, product_id, warehouse_id, quantity, state
        FROM order_line_stock
        WHERE order_id = ?1
        ORDER BY line_id
        "#,
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;

    Ok(lines)
}

/// Locks a tracked line for the rest of the transaction.
pub(crate) async fn lock_line(
    conn: &mut SqliteConnection,
    order_id: i64,
    line_id: i64,
) -> DbResult<Option<TrackedLine>> {
    let line = sqlx::query_as::<_, TrackedLine>(
        r#"
        UPDATE order_line_stock
        SET updated_at = updated_at
        WHERE order_id = ?1 AND line_id = ?2
        RETURNING order_id, line_id, product_id, warehouse_id, quantity, state
        "#,
    )
    .bind(order_id)
    .bind(line_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(line)
}

/// Records a planned line as reserved, unless it already holds stock.
///
/// ## Returns
/// `Ok(None)` when the line was claimed; `Ok(Some(state))` with the state
/// that blocked it otherwise.
pub(crate) async fn claim_for_reserve(
    conn: &mut SqliteConnection,
    order_id: i64,
    line: &PlannedLine,
) -> DbResult<Option<LineStockState>> {
    let claimed: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO order_line_stock (
            order_id, line_id, product_id, warehouse_id, quantity, state, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, 'reserved', ?6)
        ON CONFLICT (order_id, line_id) DO UPDATE SET
            product_id = excluded.product_id,
            warehouse_id = excluded.warehouse_id,
            quantity = excluded.quantity,
            state = excluded.state,
            updated_at = excluded.updated_at
        WHERE order_line_stock.state = 'unreserved'
        RETURNING line_id
        "#,
    )
    .bind(order_id)
    .bind(line.line_id)
    .bind(line.product_id)
    .bind(line.warehouse_id)
    .bind(line.quantity)
    .bind(Utc::now())
    .fetch_optional(&mut *conn)
    .await?;

    if claimed.is_some() {
        return Ok(None);
    }

    let state: LineStockState = sqlx::query_scalar(
        "SELECT state FROM order_line_stock WHERE order_id = ?1 AND line_id = ?2",
    )
    .bind(order_id)
    .bind(line.line_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(Some(state))
}

/// Moves a locked line to `state`.
pub(crate) async fn set_state(
    conn: &mut SqliteConnection,
    order_id: i64,
    line_id: i64,
    state: LineStockState,
) -> DbResult<()> {
    sqlx::query(
        "UPDATE order_line_stock SET state = ?3, updated_at = ?4 \
         WHERE order_id = ?1 AND line_id = ?2",
    )
    .bind(order_id)
    .bind(line_id)
    .bind(state)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Rewrites a locked line's placement and state.
pub(crate) async fn set_placement(
    conn: &mut SqliteConnection,
    order_id: i64,
    line_id: i64,
    warehouse_id: i64,
    quantity: i64,
    state: LineStockState,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE order_line_stock
        SET warehouse_id = ?3, quantity = ?4, state = ?5, updated_at = ?6
        WHERE order_id = ?1 AND line_id = ?2
        "#,
    )
    .bind(order_id)
    .bind(line_id)
    .bind(warehouse_id)
    .bind(quantity)
    .bind(state)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Stops tracking a line.
pub(crate) async fn remove(conn: &mut SqliteConnection, order_id: i64, line_id: i64) -> DbResult<()> {
    sqlx::query("DELETE FROM order_line_stock WHERE order_id = ?1 AND line_id = ?2")
        .bind(order_id)
        .bind(line_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}
