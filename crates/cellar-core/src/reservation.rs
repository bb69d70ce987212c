//! # Reservation Planning
//!
//! Per-line stock state machine and the canonical ordering used by every
//! multi-row caller.
//!
//! ## Line Stock State
//! ```text
//!                 reserve            confirm            refund
//!   Unreserved ───────────► Reserved ───────► Fulfilled ───────► Restocked
//!        ▲                      │
//!        └──────── cancel ──────┘
//! ```
//!
//! Only the arrows above are legal. Re-applying an arrow (reserve twice,
//! confirm twice, refund twice) is rejected; cancel is the exception and is
//! idempotent because a second cancel finds nothing reserved.
//!
//! ## Canonical Order
//! Lines are applied in ascending `(product_id, warehouse_id, line_id)`.
//! Two orders touching overlapping rows therefore always take them in the
//! same sequence and cannot wait on each other in a cycle.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{OrderLine, StockAction};
use crate::validation::validate_line_quantity;

// =============================================================================
// Line Stock State
// =============================================================================

/// Stock status of a single order line (distinct from the order's status).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum LineStockState {
    #[default]
    Unreserved,
    Reserved,
    Fulfilled,
    Restocked,
}

/// What an order-level action does to one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Mutate the ledger and move the line to this state.
    Apply(LineStockState),
    /// Nothing to do for this line.
    Skip,
    /// The action would re-apply or jump a transition.
    Reject,
}

impl LineStockState {
    /// Decides how `action` treats a line currently in `self`.
    pub fn disposition(self, action: StockAction) -> Disposition {
        use LineStockState::*;

        match (action, self) {
            (StockAction::Reserve, Unreserved) => Disposition::Apply(Reserved),
            (StockAction::Reserve, _) => Disposition::Reject,

            (StockAction::Confirm, Reserved) => Disposition::Apply(Fulfilled),
            (StockAction::Confirm, Unreserved) => Disposition::Skip,
            (StockAction::Confirm, Fulfilled | Restocked) => Disposition::Reject,

            (StockAction::Cancel, Reserved) => Disposition::Apply(Unreserved),
            (StockAction::Cancel, _) => Disposition::Skip,

            (StockAction::Refund, Fulfilled) => Disposition::Apply(Restocked),
            (StockAction::Refund, Unreserved | Reserved) => Disposition::Skip,
            (StockAction::Refund, Restocked) => Disposition::Reject,
        }
    }

    /// True while the line holds units in `reserved`.
    pub fn holds_reservation(self) -> bool {
        self == LineStockState::Reserved
    }
}

impl fmt::Display for LineStockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LineStockState::Unreserved => "unreserved",
            LineStockState::Reserved => "reserved",
            LineStockState::Fulfilled => "fulfilled",
            LineStockState::Restocked => "restocked",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Tracked Lines
// =============================================================================

/// What the engine recorded for a line when it reserved it.
///
/// Confirm, cancel and refund act on this placement, not on the current
/// order line, so an edit that bypassed the adjuster cannot make the engine
/// release from the wrong row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct TrackedLine {
    pub order_id: i64,
    pub line_id: i64,
    pub product_id: i64,
    pub warehouse_id: i64,
    pub quantity: i64,
    pub state: LineStockState,
}

impl TrackedLine {
    fn stock_key(&self) -> (i64, i64, i64) {
        (self.product_id, self.warehouse_id, self.line_id)
    }
}

// =============================================================================
// Plans
// =============================================================================

/// A line ready to be reserved against a concrete warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedLine {
    pub line_id: i64,
    pub product_id: i64,
    pub warehouse_id: i64,
    pub quantity: i64,
}

/// Reservation plan for one order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPlan {
    /// Lines to reserve, in canonical order.
    pub lines: Vec<PlannedLine>,
    /// Line ids without a warehouse; flagged, not fatal.
    pub unassigned: Vec<i64>,
}

/// Builds the reservation plan for an order.
///
/// ## Rules
/// - Every line quantity must be positive.
/// - Lines without a warehouse go to `unassigned`.
/// - A line already tracked in any state other than `Unreserved` rejects
///   the whole plan (double reservation).
pub fn plan_reservation(
    order_id: i64,
    lines: &[OrderLine],
    tracked: &HashMap<i64, LineStockState>,
) -> CoreResult<ReservationPlan> {
    let mut plan = ReservationPlan::default();

    for line in lines {
        validate_line_quantity(line.quantity)?;

        let state = tracked.get(&line.line_id).copied().unwrap_or_default();
        if state.disposition(StockAction::Reserve) == Disposition::Reject {
            return Err(CoreError::IllegalTransition {
                order_id,
                line_id: line.line_id,
                state,
                action: StockAction::Reserve,
            });
        }

        match line.warehouse_id {
            Some(warehouse_id) => plan.lines.push(PlannedLine {
                line_id: line.line_id,
                product_id: line.product_id,
                warehouse_id,
                quantity: line.quantity,
            }),
            None => plan.unassigned.push(line.line_id),
        }
    }

    plan.lines
        .sort_by_key(|l| (l.product_id, l.warehouse_id, l.line_id));
    plan.unassigned.sort_unstable();

    Ok(plan)
}

/// Confirm / cancel / refund plan for an order's tracked lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionPlan {
    /// Lines to mutate, in canonical order, paired with their next state.
    pub lines: Vec<(TrackedLine, LineStockState)>,
    /// Lines the action does not touch.
    pub skipped: Vec<i64>,
}

/// Validates every tracked line against `action` before anything is applied.
///
/// A single rejected line fails the whole call so that no line is mutated
/// when the order as a whole is in the wrong state.
pub fn plan_transition(
    order_id: i64,
    mut tracked: Vec<TrackedLine>,
    action: StockAction,
) -> CoreResult<TransitionPlan> {
    tracked.sort_by_key(TrackedLine::stock_key);

    let mut plan = TransitionPlan::default();
    for line in tracked {
        match line.state.disposition(action) {
            Disposition::Apply(next) => plan.lines.push((line, next)),
            Disposition::Skip => plan.skipped.push(line.line_id),
            Disposition::Reject => {
                return Err(CoreError::IllegalTransition {
                    order_id,
                    line_id: line.line_id,
                    state: line.state,
                    action,
                })
            }
        }
    }

    Ok(plan)
}

// =============================================================================
// Unit Tests
// =============================================================================
