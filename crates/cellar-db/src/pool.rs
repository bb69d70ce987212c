//! # Connection Pool
//!
//! Opens the SQLite stock database and hands out the components that work
//! on it. Every component holds a clone of the same [`SqlitePool`].
//!
//! ## Who Shares The Pool
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      One Database, Many Writers                         │
//! │                                                                         │
//! │  Database::new(DbConfig)                                               │
//! │   ├── open file (or :memory:), WAL, busy_timeout, foreign keys         │
//! │   └── apply embedded migrations                                        │
//! │                                                                         │
//! │  db.ledger()  db.reservations()  db.adjuster()  db.transfers()         │
//! │       │              │                 │               │                │
//! │       └──────────────┴────────┬────────┴───────────────┘                │
//! │                               ▼                                         │
//! │                    SqlitePool (max_connections)                         │
//! │                               │                                         │
//! │      mutations ───────────────┤ one writer at a time (write lock);     │
//! │                               │ others wait up to busy_timeout         │
//! │      get_available ───────────┘ WAL readers never wait on writers      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## In-Memory Databases
//! `:memory:` lives inside a single connection, so [`DbConfig::in_memory`]
//! caps the pool at one connection and never recycles it. Code running on
//! such a pool must commit or drop a transaction before it asks the pool for
//! another connection.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::adjuster::OrderItemAdjuster;
use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::movement::MovementRepository;
use crate::repository::order_line::SqliteOrderLineSource;
use crate::repository::stock::StockLedger;
use crate::reservation::ReservationEngine;
use crate::transfer::WarehouseTransfers;

const IN_MEMORY: &str = ":memory:";

// =============================================================================
// Pool Settings
// =============================================================================

/// How to open the stock database.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/cellar/stock.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite file, created on first open. `:memory:` for a private database.
    pub database_path: PathBuf,

    /// Upper bound on pooled connections (default 5).
    pub max_connections: u32,

    /// Connections kept open while idle (default 1).
    pub min_connections: u32,

    /// How long a caller waits for a free pooled connection (default 30s).
    pub acquire_timeout: Duration,

    /// How long a writer waits for SQLite's write lock (default 5s).
    pub busy_timeout: Duration,

    /// Idle connections beyond `min_connections` close after this (default 10m).
    pub idle_timeout: Duration,

    /// Apply pending migrations when the pool opens (default true).
    pub migrate_on_open: bool,
}

impl DbConfig {
    /// Settings for a file-backed database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(10 * 60),
            migrate_on_open: true,
        }
    }

    /// Private in-memory database on a single connection.
    ///
    /// ```rust,ignore
    /// let db = Database::new(DbConfig::in_memory()).await?;
    /// ```
    pub fn in_memory() -> Self {
        DbConfig {
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            ..DbConfig::new(IN_MEMORY)
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets how long to wait for a pooled connection.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets how long a writer queues on the write lock.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.migrate_on_open = run;
        self
    }

    /// True for the `:memory:` configuration.
    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let url = if self.is_in_memory() {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", self.database_path.display())
        };

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            // NORMAL under WAL: a crash can lose the last commit, never corrupt
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.busy_timeout)
            .foreign_keys(true)
            .create_if_missing(true);

        Ok(options)
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        let options = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout);

        if self.is_in_memory() {
            // closing the only connection would drop the database with it
            options
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            options.idle_timeout(Some(self.idle_timeout))
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Open stock database. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and, unless disabled, applies pending migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.database_path.display(), "Opening stock database");

        let pool = config
            .pool_options()
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        debug!(
            max_connections = config.max_connections,
            busy_timeout_ms = config.busy_timeout.as_millis() as u64,
            "Stock database pool ready"
        );

        let db = Database { pool };
        if config.migrate_on_open {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Applies any embedded migration not yet recorded.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Per-row stock operations.
    ///
    /// ```rust,ignore
    /// let level = db.ledger().get_available(product_id, warehouse_id).await?;
    /// ```
    pub fn ledger(&self) -> StockLedger {
        StockLedger::new(self.pool.clone())
    }

    /// Movement journal reads.
    pub fn movements(&self) -> MovementRepository {
        MovementRepository::new(self.pool.clone())
    }

    /// Order lines stored in `order_items`.
    pub fn order_lines(&self) -> SqliteOrderLineSource {
        SqliteOrderLineSource::new(self.pool.clone())
    }

    /// Reservation engine reading lines from `order_items`.
    pub fn reservations(&self) -> ReservationEngine<SqliteOrderLineSource> {
        ReservationEngine::new(self.pool.clone(), self.order_lines())
    }

    /// Reservation upkeep for edited order lines.
    pub fn adjuster(&self) -> OrderItemAdjuster {
        OrderItemAdjuster::new(self.pool.clone())
    }

    /// Manual transfers and adjustments.
    pub fn transfers(&self) -> WarehouseTransfers {
        WarehouseTransfers::new(self.pool.clone())
    }

    /// Waits for checked-out connections to return, then closes the pool.
    pub async fn close(&self) {
        info!("Closing stock database");
        self.pool.close().await;
    }

    /// True when a trivial query succeeds.
    pub async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        assert!(db.health_check().await);
        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);
        assert!(total >= 2);
    }

    #[test]
    fn test_builder_and_in_memory_defaults() {
        let config = DbConfig::new("/tmp/cellar.db")
            .max_connections(10)
            .min_connections(2)
            .busy_timeout(Duration::from_millis(250))
            .run_migrations(false);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert!(!config.migrate_on_open);
        assert!(!config.is_in_memory());

        let memory = DbConfig::in_memory();
        assert!(memory.is_in_memory());
        assert_eq!(memory.max_connections, 1);
    }
}
