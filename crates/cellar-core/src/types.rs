//! # Domain Types
//!
//! Stock types shared by the ledger, the reservation engine and callers.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    StockRow     │   │    OrderLine    │   │  StockMovement  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  product_id  ┐  │   │  line_id        │   │  kind           │       │
//! │  │  warehouse_id┘PK│   │  order_id       │   │  quantity_delta │       │
//! │  │  quantity       │   │  product_id     │   │  reserved_delta │       │
//! │  │  reserved       │   │  warehouse_id?  │   │  order_id?      │       │
//! │  └─────────────────┘   │  quantity       │   │  reason?        │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   OrderStatus   │   │   StockAction   │   │  MovementKind   │       │
//! │  │  created, paid  │   │  Reserve        │   │  reserve,       │       │
//! │  │  shipped, ...   │   │  Confirm        │   │  release, ...   │       │
//! │  │  refunded       │   │  Cancel, Refund │   │                 │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identifiers
//! Products, warehouses, orders and order lines are owned by other services.
//! This crate only ever sees their integer ids.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::reservation::LineStockState;
use crate::validation::{validate_non_negative, validate_quantity};

// =============================================================================
// Stock Row
// =============================================================================

/// On-hand and reserved units of one product in one warehouse.
///
/// ## Invariant
/// `0 <= reserved <= quantity` for every row after every operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockRow {
    pub product_id: i64,
    pub warehouse_id: i64,
    /// Physical units present.
    pub quantity: i64,
    /// Units earmarked for unfulfilled orders.
    pub reserved: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockRow {
    /// Creates a row with nothing reserved.
    pub fn new(product_id: i64, warehouse_id: i64, quantity: i64) -> Self {
        StockRow {
            product_id,
            warehouse_id,
            quantity,
            reserved: 0,
            updated_at: Utc::now(),
        }
    }

    /// Sets the reserved count (builder style, mostly for tests).
    pub fn with_reserved(mut self, reserved: i64) -> Self {
        self.reserved = reserved;
        self
    }

    /// Units safe to sell.
    #[inline]
    pub fn available(&self) -> i64 {
        self.quantity - self.reserved
    }

    /// Whether `qty` more units can be reserved.
    #[inline]
    pub fn can_reserve(&self, qty: i64) -> bool {
        qty > 0 && self.available() >= qty
    }

    /// Checks `0 <= reserved <= quantity`.
    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.reserved >= 0 && self.reserved <= self.quantity
    }

    /// Snapshot of the three numbers callers care about.
    pub fn level(&self) -> StockLevel {
        StockLevel {
            quantity: self.quantity,
            reserved: self.reserved,
            available: self.available(),
        }
    }

    // -------------------------------------------------------------------------
    // Row transitions
    // -------------------------------------------------------------------------
    // Each returns the row as it must look after the operation, or the reason
    // the operation is refused. The ledger calls these while it holds the
    // row's write lock, so the check and the write cannot be interleaved.

    /// `reserved += qty`, refused when `available < qty`.
    pub fn after_reserve(&self, qty: i64) -> CoreResult<StockRow> {
        validate_quantity(qty)?;

        if self.available() < qty {
            return Err(self.insufficient(qty));
        }

        Ok(StockRow {
            reserved: self.reserved + qty,
            ..self.clone()
        })
    }

    /// `reserved -= min(qty, reserved)`.
    ///
    /// ## Returns
    /// The new row and the number of units actually released. Releasing
    /// more than is reserved is clamped so retried cancels stay harmless.
    pub fn after_release(&self, qty: i64) -> CoreResult<(StockRow, i64)> {
        validate_non_negative("quantity", qty)?;

        let released = qty.min(self.reserved);
        let row = StockRow {
            reserved: self.reserved - released,
            ..self.clone()
        };
        Ok((row, released))
    }

    /// `quantity -= qty; reserved -= qty` on payment.
    pub fn after_fulfil(&self, qty: i64) -> CoreResult<StockRow> {
        validate_quantity(qty)?;

        if self.reserved < qty {
            return Err(self.violation("fulfil", qty));
        }

        Ok(StockRow {
            quantity: self.quantity - qty,
            reserved: self.reserved - qty,
            ..self.clone()
        })
    }

    /// `quantity += qty` (refund, manual stocking, transfer destination).
    pub fn after_restock(&self, qty: i64) -> CoreResult<StockRow> {
        validate_non_negative("quantity", qty)?;

        Ok(StockRow {
            quantity: self.grown_by(qty)?,
            ..self.clone()
        })
    }

    /// `quantity += delta`, refused when the result would drop below `reserved`.
    pub fn after_adjust(&self, delta: i64) -> CoreResult<StockRow> {
        let resulting = self.grown_by(delta)?;

        if resulting < self.reserved {
            return Err(ValidationError::BelowReserved {
                delta,
                resulting,
                reserved: self.reserved,
            }
            .into());
        }

        Ok(StockRow {
            quantity: resulting,
            ..self.clone()
        })
    }

    /// `quantity -= qty` for a transfer source; only unreserved units may leave.
    pub fn after_withdraw(&self, qty: i64) -> CoreResult<StockRow> {
        validate_quantity(qty)?;

        if self.available() < qty {
            return Err(self.insufficient(qty));
        }

        Ok(StockRow {
            quantity: self.quantity - qty,
            ..self.clone()
        })
    }

    /// Refuses deletion while units are earmarked.
    pub fn ensure_deletable(&self) -> CoreResult<()> {
        if self.reserved > 0 {
            return Err(ValidationError::ActiveReservations {
                reserved: self.reserved,
            }
            .into());
        }
        Ok(())
    }

    fn grown_by(&self, delta: i64) -> CoreResult<i64> {
        self.quantity
            .checked_add(delta)
            .ok_or(CoreError::QuantityOverflow {
                product_id: self.product_id,
                warehouse_id: self.warehouse_id,
                quantity: self.quantity,
                delta,
            })
    }

    fn insufficient(&self, requested: i64) -> CoreError {
        CoreError::InsufficientStock {
            product_id: self.product_id,
            warehouse_id: self.warehouse_id,
            available: self.available(),
            requested,
        }
    }

    fn violation(&self, operation: &str, attempted: i64) -> CoreError {
        CoreError::InvariantViolation {
            product_id: self.product_id,
            warehouse_id: self.warehouse_id,
            operation: operation.to_string(),
            attempted,
            quantity: self.quantity,
            reserved: self.reserved,
        }
    }
}

// =============================================================================
// Stock Level
// =============================================================================

/// `(quantity, reserved, available)` as returned by availability reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub quantity: i64,
    pub reserved: i64,
    pub available: i64,
}

impl StockLevel {
    /// Level reported for a pair that has no row: out of stock.
    pub const OUT_OF_STOCK: StockLevel = StockLevel {
        quantity: 0,
        reserved: 0,
        available: 0,
    };
}

impl std::ops::Add for StockLevel {
    type Output = StockLevel;

    fn add(self, rhs: StockLevel) -> StockLevel {
        StockLevel {
            quantity: self.quantity.saturating_add(rhs.quantity),
            reserved: self.reserved.saturating_add(rhs.reserved),
            available: self.available.saturating_add(rhs.available),
        }
    }
}

// =============================================================================
// Order Lines
// =============================================================================

/// One line of an order as reported by the order service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderLine {
    pub line_id: i64,
    pub order_id: i64,
    pub product_id: i64,
    /// `None` until the order service assigns a warehouse.
    pub warehouse_id: Option<i64>,
    pub quantity: i64,
}

impl OrderLine {
    /// Where this line draws stock from.
    pub fn placement(&self) -> LinePlacement {
        LinePlacement {
            warehouse_id: self.warehouse_id,
            quantity: self.quantity,
        }
    }
}

/// Warehouse and quantity of a line before or after an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePlacement {
    pub warehouse_id: Option<i64>,
    pub quantity: i64,
}

impl LinePlacement {
    pub fn new(warehouse_id: i64, quantity: i64) -> Self {
        LinePlacement {
            warehouse_id: Some(warehouse_id),
            quantity,
        }
    }

    pub fn unassigned(quantity: i64) -> Self {
        LinePlacement {
            warehouse_id: None,
            quantity,
        }
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// Order status as owned by the order service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Statuses whose fulfilled lines may still be refunded.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Shipped | OrderStatus::Delivered
        )
    }
}

// =============================================================================
// Stock Action
// =============================================================================

/// The four order-level triggers the reservation engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockAction {
    /// Order created: earmark stock.
    Reserve,
    /// Payment confirmed: turn reservations into deductions.
    Confirm,
    /// Order cancelled before payment: drop reservations.
    Cancel,
    /// Paid order refunded: put units back on the shelf.
    Refund,
}

impl StockAction {
    /// Maps an order status change to the stock action it triggers.
    ///
    /// ```text
    /// (none)  ──► created            Reserve
    /// created ──► paid               Confirm
    /// created ──► cancelled          Cancel
    /// paid/shipped/delivered ──► refunded   Refund
    /// anything else                  no stock effect
    /// ```
    pub fn for_transition(from: Option<OrderStatus>, to: OrderStatus) -> Option<StockAction> {
        match (from, to) {
            (None, OrderStatus::Created) => Some(StockAction::Reserve),
            (Some(OrderStatus::Created), OrderStatus::Paid) => Some(StockAction::Confirm),
            (Some(OrderStatus::Created), OrderStatus::Cancelled) => Some(StockAction::Cancel),
            (Some(from), OrderStatus::Refunded) if from.is_settled() => Some(StockAction::Refund),
            _ => None,
        }
    }
}

impl fmt::Display for StockAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StockAction::Reserve => "reserve",
            StockAction::Confirm => "confirm",
            StockAction::Cancel => "cancel",
            StockAction::Refund => "refund",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Engine Reports
// =============================================================================

/// What happened to one line during an order-level call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineOutcome {
    pub line_id: i64,
    pub product_id: i64,
    pub warehouse_id: i64,
    pub quantity: i64,
    pub state: LineStockState,
}

/// Result of `ReservationEngine::apply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStockReport {
    pub order_id: i64,
    pub action: StockAction,
    /// Lines whose stock state changed, in the order they were applied.
    pub applied: Vec<LineOutcome>,
    /// Lines left alone because the action does not apply to their state.
    pub skipped: Vec<i64>,
    /// Lines with no warehouse yet (reserve only).
    pub unassigned: Vec<i64>,
}

impl OrderStockReport {
    pub fn new(order_id: i64, action: StockAction) -> Self {
        OrderStockReport {
            order_id,
            action,
            applied: Vec::new(),
            skipped: Vec::new(),
            unassigned: Vec::new(),
        }
    }

    /// Total units touched by this call.
    pub fn units(&self) -> i64 {
        self.applied.iter().map(|l| l.quantity).sum()
    }

    /// True when some lines still need a warehouse before they can be reserved.
    pub fn needs_assignment(&self) -> bool {
        !self.unassigned.is_empty()
    }
}

// =============================================================================
// Movement Journal
// =============================================================================

/// Kind of change recorded in the movement journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Create,
    Reserve,
    Release,
    Fulfil,
    Restock,
    Adjust,
    TransferOut,
    TransferIn,
    Delete,
}

/// One journal entry, written in the same transaction as the row change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockMovement {
    pub id: i64,
    pub product_id: i64,
    pub warehouse_id: i64,
    pub kind: MovementKind,
    pub quantity_delta: i64,
    pub reserved_delta: i64,
    pub order_id: Option<i64>,
    pub reason: Option<String>,
    /// Shared by both legs of a transfer.
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_and_consistency() {
        let row = StockRow::new(1, 1, 100).with_reserved(30);
        assert_eq!(row.available(), 70);
        assert!(row.is_consistent());
        assert!(row.can_reserve(70));
        assert!(!row.can_reserve(71));
        assert!(!row.can_reserve(0));

        let oversold = StockRow::new(1, 1, 10).with_reserved(11);
        assert!(!oversold.is_consistent());
    }

    #[test]
    fn test_reserve_then_release_is_noop() {
        let row = StockRow::new(1, 1, 100);
        let reserved = row.after_reserve(30).unwrap();
        assert_eq!(reserved.level().available, 70);

        let (released, n) = reserved.after_release(30).unwrap();
        assert_eq!(n, 30);
        assert_eq!((released.quantity, released.reserved), (100, 0));
    }

    #[test]
    fn test_reserve_refuses_oversell() {
        let row = StockRow::new(1, 1, 100).with_reserved(60);
        let err = row.after_reserve(50).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InsufficientStock {
                available: 40,
                requested: 50,
                ..
            }
        ));
    }

    #[test]
    fn test_release_clamps() {
        let row = StockRow::new(1, 1, 10).with_reserved(3);
        let (row, released) = row.after_release(8).unwrap();
        assert_eq!(released, 3);
        assert_eq!(row.reserved, 0);

        let (row, released) = row.after_release(8).unwrap();
        assert_eq!(released, 0);
        assert_eq!(row.reserved, 0);
    }

    #[test]
    fn test_fulfil_keeps_available() {
        let row = StockRow::new(1, 1, 100).with_reserved(30);
        let after = row.after_fulfil(30).unwrap();
        assert_eq!((after.quantity, after.reserved), (70, 0));
        assert_eq!(after.available(), row.available());
    }

    #[test]
    fn test_fulfil_more_than_reserved_is_violation() {
        let row = StockRow::new(1, 1, 100).with_reserved(10);
        let err = row.after_fulfil(11).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvariantViolation {
                attempted: 11,
                reserved: 10,
                ..
            }
        ));
    }

    #[test]
    fn test_adjust_below_reserved() {
        let row = StockRow::new(1, 1, 10).with_reserved(6);
        assert_eq!(row.after_adjust(-4).unwrap().quantity, 6);
        assert!(matches!(
            row.after_adjust(-5),
            Err(CoreError::Validation(ValidationError::BelowReserved { resulting: 5, .. }))
        ));
    }

    #[test]
    fn test_large_restock_and_overflow() {
        let row = StockRow::new(1, 1, 10);
        assert_eq!(row.after_restock(1_500_000).unwrap().quantity, 1_500_010);
        assert_eq!(row.after_adjust(2_000_000).unwrap().quantity, 2_000_010);

        let full = StockRow::new(1, 1, i64::MAX - 1);
        assert!(matches!(
            full.after_restock(2),
            Err(CoreError::QuantityOverflow { delta: 2, .. })
        ));
        assert!(matches!(
            full.after_adjust(5),
            Err(CoreError::QuantityOverflow { .. })
        ));
    }

    #[test]
    fn test_withdraw_only_unreserved_units() {
        let row = StockRow::new(1, 1, 10).with_reserved(2);
        assert_eq!(row.after_withdraw(8).unwrap().quantity, 2);
        assert!(matches!(
            row.after_withdraw(9),
            Err(CoreError::InsufficientStock { available: 8, .. })
        ));
    }

    #[test]
    fn test_delete_requires_no_reservations() {
        assert!(StockRow::new(1, 1, 10).ensure_deletable().is_ok());
        assert!(StockRow::new(1, 1, 10).with_reserved(1).ensure_deletable().is_err());
    }

    #[test]
    fn test_level_sum() {
        let a = StockRow::new(1, 1, 10).with_reserved(4).level();
        let b = StockRow::new(1, 2, 5).level();
        let total = a + b;
        assert_eq!(total.quantity, 15);
        assert_eq!(total.reserved, 4);
        assert_eq!(total.available, 11);
        assert_eq!(StockLevel::OUT_OF_STOCK.available, 0);
    }

    #[test]
    fn test_action_for_transition() {
        use OrderStatus::*;

        assert_eq!(StockAction::for_transition(None, Created), Some(StockAction::Reserve));
        assert_eq!(StockAction::for_transition(Some(Created), Paid), Some(StockAction::Confirm));
        assert_eq!(
            StockAction::for_transition(Some(Created), Cancelled),
            Some(StockAction::Cancel)
        );
        assert_eq!(
            StockAction::for_transition(Some(Delivered), Refunded),
            Some(StockAction::Refund)
        );
        assert_eq!(StockAction::for_transition(Some(Paid), Shipped), None);
        assert_eq!(StockAction::for_transition(Some(Created), Refunded), None);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&OrderStatus::Refunded).unwrap();
        assert_eq!(json, "\"refunded\"");
        let kind = serde_json::to_string(&MovementKind::TransferOut).unwrap();
        assert_eq!(kind, "\"transfer_out\"");
    }

    #[test]
    fn test_report_units() {
        let mut report = OrderStockReport::new(5, StockAction::Reserve);
        report.applied.push(LineOutcome {
            line_id: 1,
            product_id: 1,
            warehouse_id: 1,
            quantity: 30,
            state: LineStockState::Reserved,
        });
        report.unassigned.push(2);
        assert_eq!(report.units(), 30);
        assert!(report.needs_assignment());
    }
}
