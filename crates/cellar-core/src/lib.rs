//! # cellar-core: Pure Stock Rules for the Cellar Backend
//!
//! This crate holds the stock reservation rules as pure functions with zero
//! I/O dependencies. Storage, locking and logging live in `cellar-db`.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Cellar Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Order service / Warehouse admin (external)           │   │
//! │  │    create, pay, cancel, refund, edit line, transfer, adjust     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    cellar-db (stateful)                         │   │
//! │  │   ReservationEngine, OrderItemAdjuster, WarehouseTransfers      │   │
//! │  │                      StockLedger (SQLite)                       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ uses                                   │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ cellar-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌─────────────┐  ┌────────────┐  ┌──────────┐ │   │
//! │  │   │   types   │  │ reservation │  │ validation │  │  error   │ │   │
//! │  │   │ StockRow  │  │ line state  │  │   rules    │  │ CoreError│ │   │
//! │  │   │ OrderLine │  │  planning   │  │            │  │          │ │   │
//! │  │   └───────────┘  └─────────────┘  └────────────┘  └──────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Stock rows, order lines, order status, movement kinds
//! - [`reservation`] - Line stock state machine and canonical ordering
//! - [`validation`] - Quantity and transfer validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use cellar_core::StockRow;
//!
//! let row = StockRow::new(1, 1, 100).with_reserved(30);
//! assert_eq!(row.available(), 70);
//! assert!(row.can_reserve(70));
//! assert!(!row.can_reserve(71));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod reservation;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use reservation::{
    plan_reservation, plan_transition, Disposition, LineStockState, PlannedLine, ReservationPlan,
    TrackedLine, TransitionPlan,
};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Largest quantity accepted on a single order line.
///
/// Catches typos such as 10000 instead of 10 before they reserve a
/// warehouse dry. Ledger calls themselves are not capped.
pub const MAX_LINE_QUANTITY: i64 = 1_000_000;

/// Default threshold for the low-stock report.
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 5;
