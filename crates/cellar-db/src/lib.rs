//! # cellar-db: Stock Ledger and Reservation Engine
//!
//! Every stateful part of the stock core: the SQLite-backed ledger, the
//! order-level reservation engine, the line adjuster and manual transfers.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Cellar Stock Data Flow                           │
//! │                                                                         │
//! │  Order service (create / pay / cancel / refund / edit line)            │
//! │  Warehouse admin (transfer / adjust)                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     cellar-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────────┐  ┌────────────────┐  ┌─────────────────┐  │   │
//! │  │   │ Reservation    │  │ OrderItem      │  │ Warehouse       │  │   │
//! │  │   │ Engine         │  │ Adjuster       │  │ Transfers       │  │   │
//! │  │   └───────┬────────┘  └───────┬────────┘  └────────┬────────┘  │   │
//! │  │           └──────────┬────────┴────────────────────┘           │   │
//! │  │                      ▼                                         │   │
//! │  │   ┌────────────────────────────┐    ┌──────────────────────┐   │   │
//! │  │   │ StockLedger (repository)   │    │ Migrations (embedded)│   │   │
//! │  │   │ one tx per row, lock first │    │ 001_stock_ledger.sql │   │   │
//! │  │   └────────────────────────────┘    └──────────────────────┘   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL)                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`config`] - Layered file + environment configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Stock ledger, movement journal, order line source
//! - [`reservation`] - Order-level reserve / confirm / cancel / refund
//! - [`adjuster`] - Reservation upkeep for edited order lines
//! - [`transfer`] - Manual transfers and adjustments
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cellar_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("stock.db")).await?;
//!
//! db.ledger().create_row(1, 1, 100).await?;
//! let report = db.reservations().reserve_order(5).await?;
//! db.reservations().confirm_order(5).await?;
//!
//! let level = db.ledger().get_available(1, 1).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod adjuster;
pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod reservation;
pub mod transfer;

// =============================================================================
// Re-exports
// =============================================================================

pub use adjuster::{AdjustOutcome, OrderItemAdjuster};
pub use config::CellarConfig;
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use reservation::ReservationEngine;
pub use transfer::{TransferReceipt, WarehouseTransfers};

// Repository re-exports for convenience
pub use repository::movement::{MovementContext, MovementRepository};
pub use repository::order_line::{OrderLineSource, SqliteOrderLineSource};
pub use repository::stock::StockLedger;
