//! # Schema Migrations
//!
//! The SQL under `migrations/sqlite/` is compiled into the binary and applied
//! by [`Database::new`](crate::pool::Database::new).
//!
//! ```text
//! migrations/sqlite/
//! ├── 001_stock_ledger.sql         stock_rows, stock_movements
//! └── 002_order_reservations.sql   order_items, order_line_stock
//! ```
//!
//! sqlx records each applied file in `_sqlx_migrations` with its checksum,
//! so an applied file must never be edited. Schema changes go in a new
//! `NNN_description.sql` with the next number.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies every embedded migration not yet recorded, in file order.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    debug!(embedded = MIGRATOR.migrations.len(), "Applying stock schema migrations");
    MIGRATOR.run(pool).await?;
    info!("Stock schema up to date");
    Ok(())
}

/// `(embedded, applied)` migration counts; equal on an up-to-date database.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await?;

    Ok((MIGRATOR.migrations.len(), usize::try_from(applied).unwrap_or(0)))
}
