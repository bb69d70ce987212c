//! # Repository Module
//!
//! Row-level storage for the stock core.
//!
//! ## Layering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Who Touches Which Table                              │
//! │                                                                         │
//! │  ReservationEngine   OrderItemAdjuster   WarehouseTransfers            │
//! │         │                   │                    │                      │
//! │         └───────────┬───────┴────────────────────┘                      │
//! │                     │  reserve_in / release_in / withdraw_in ...       │
//! │                     ▼                                                   │
//! │              StockLedger ──────────► stock_rows                        │
//! │                     │                                                   │
//! │                     └── same tx ───► stock_movements                   │
//! │                                                                         │
//! │  SqliteOrderLineSource ─────────────► order_items  (read only)         │
//! │  line_stock (engine + adjuster) ────► order_line_stock                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`StockLedger`](stock::StockLedger) - per-row atomic stock operations
//! - [`MovementRepository`](movement::MovementRepository) - movement journal
//! - [`SqliteOrderLineSource`](order_line::SqliteOrderLineSource) - order lines
//! - `line_stock` - per-line reservation state, written by the engine and adjuster

pub(crate) mod line_stock;
pub mod movement;
pub mod order_line;
pub mod stock;
