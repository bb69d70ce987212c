//! # Reservation Engine
//!
//! Applies order-level stock actions across every line of an order.
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Order 5: one line, 30 units of (1, 1)               │
//! │                                                                         │
//! │  row (1,1): quantity 100, reserved 0                                   │
//! │       │                                                                 │
//! │       │ reserve_order(5)     line: unreserved → reserved               │
//! │       ▼                                                                 │
//! │  row (1,1): quantity 100, reserved 30   (available 70)                 │
//! │       │                                                                 │
//! │       │ confirm_order(5)     line: reserved → fulfilled                │
//! │       ▼                                                                 │
//! │  row (1,1): quantity 70, reserved 0                                    │
//! │       │                                                                 │
//! │       │ refund_order(5)      line: fulfilled → restocked               │
//! │       ▼                                                                 │
//! │  row (1,1): quantity 100, reserved 0                                   │
//! │                                                                         │
//! │  cancel_order(5) before payment: reserved → unreserved, reserved -= 30 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## One Transaction Per Line
//! An order is never wrapped in a single cross-row transaction. Each line's
//! ledger change and its line state commit together; lines are applied in
//! ascending `(product_id, warehouse_id, line_id)`.
//!
//! If reserving any line fails, the lines this call already reserved are
//! released again in reverse order and the first failure is returned.

use std::collections::HashMap;

use sqlx::SqlitePool;
use tracing::{error, info, instrument, warn};

use crate::error::{DbError, DbResult};
use crate::repository::line_stock;
use crate::repository::movement::MovementContext;
use crate::repository::order_line::OrderLineSource;
use crate::repository::stock;
use cellar_core::{
    plan_reservation, plan_transition, CoreError, LineOutcome, LineStockState, OrderStatus,
    OrderStockReport, PlannedLine, StockAction, TrackedLine,
};

/// Order actions that move already-tracked lines. Reserve has its own path.
#[derive(Debug, Clone, Copy)]
enum Settle {
    Confirm,
    Cancel,
    Refund,
}

impl Settle {
    fn action(self) -> StockAction {
        match self {
            Settle::Confirm => StockAction::Confirm,
            Settle::Cancel => StockAction::Cancel,
            Settle::Refund => StockAction::Refund,
        }
    }
}

/// Order-scoped reserve / confirm / cancel / refund.
#[derive(Debug, Clone)]
pub struct ReservationEngine<S> {
    pool: SqlitePool,
    source: S,
}

impl<S: OrderLineSource> ReservationEngine<S> {
    /// Creates an engine reading order lines from `source`.
    pub fn new(pool: SqlitePool, source: S) -> Self {
        ReservationEngine { pool, source }
    }

    /// What the engine currently tracks for each line of an order.
    pub async fn line_states(&self, order_id: i64) -> DbResult<Vec<TrackedLine>> {
        line_stock::load_order(&self.pool, order_id).await
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Runs one of the four stock actions for an order.
    pub async fn apply(&self, order_id: i64, action: StockAction) -> DbResult<OrderStockReport> {
        match action {
            StockAction::Reserve => self.reserve_order(order_id).await,
            StockAction::Confirm => self.confirm_order(order_id).await,
            StockAction::Cancel => self.cancel_order(order_id).await,
            StockAction::Refund => self.refund_order(order_id).await,
        }
    }

    /// Applies whatever stock action an order status change implies.
    ///
    /// ## Returns
    /// `None` when the change has no stock effect (e.g. paid → shipped).
    pub async fn on_status_change(
        &self,
        order_id: i64,
        from: Option<OrderStatus>,
        to: OrderStatus,
    ) -> DbResult<Option<OrderStockReport>> {
        match StockAction::for_transition(from, to) {
            Some(action) => self.apply(order_id, action).await.map(Some),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Reserve
    // =========================================================================

    /// Reserves every line that has a warehouse.
    ///
    /// ## Errors
    /// - `IllegalTransition` if any line already holds or consumed stock
    /// - `LineRejected` naming the first failing line and wrapping its cause
    ///   (usually `InsufficientStock`), after this call's reservations were
    ///   released again
    #[instrument(skip(self))]
    pub async fn reserve_order(&self, order_id: i64) -> DbResult<OrderStockReport> {
        let lines = self.source.lines_for_order(order_id).await?;
        let tracked: HashMap<i64, LineStockState> = self
            .line_states(order_id)
            .await?
            .into_iter()
            .map(|line| (line.line_id, line.state))
            .collect();

        let plan = plan_reservation(order_id, &lines, &tracked)?;

        let mut report = OrderStockReport::new(order_id, StockAction::Reserve);
        if !plan.unassigned.is_empty() {
            warn!(unassigned = ?plan.unassigned, "Lines without a warehouse were not reserved");
            report.unassigned = plan.unassigned.clone();
        }

        let ctx = MovementContext::for_order(order_id);
        let mut applied: Vec<PlannedLine> = Vec::with_capacity(plan.lines.len());

        for line in &plan.lines {
            if let Err(err) = self.reserve_line(order_id, line, &ctx).await {
                warn!(
                    line_id = line.line_id,
                    product_id = line.product_id,
                    warehouse_id = line.warehouse_id,
                    qty = line.quantity,
                    error = %err,
                    "Line reservation failed, releasing this order's reservations"
                );
                self.roll_back(order_id, &applied, &ctx).await;
                return Err(DbError::LineRejected {
                    order_id,
                    line_id: line.line_id,
                    source: Box::new(err),
                });
            }

            applied.push(*line);
            report.applied.push(LineOutcome {
                line_id: line.line_id,
                product_id: line.product_id,
                warehouse_id: line.warehouse_id,
                quantity: line.quantity,
                state: LineStockState::Reserved,
            });
        }

        info!(
            lines = report.applied.len(),
            units = report.units(),
            "Order reserved"
        );
        Ok(report)
    }

    async fn reserve_line(
        &self,
        order_id: i64,
        line: &PlannedLine,
        ctx: &MovementContext,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        if let Some(state) = line_stock::claim_for_reserve(&mut tx, order_id, line).await? {
            return Err(CoreError::IllegalTransition {
                order_id,
                line_id: line.line_id,
                state,
                action: StockAction::Reserve,
            }
            .into());
        }

        stock::reserve_in(&mut tx, line.product_id, line.warehouse_id, line.quantity, ctx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Releases `applied` in reverse order. Failures are logged, not returned:
    /// the caller is already failing with the original error.
    async fn roll_back(&self, order_id: i64, applied: &[PlannedLine], ctx: &MovementContext) {
        for line in applied.iter().rev() {
            if let Err(err) = self.release_line(order_id, line, ctx).await {
                error!(
                    line_id = line.line_id,
                    product_id = line.product_id,
                    warehouse_id = line.warehouse_id,
                    qty = line.quantity,
                    error = %err,
                    "Could not roll back line reservation; units remain reserved"
                );
            }
        }
    }

    async fn release_line(
        &self,
        order_id: i64,
        line: &PlannedLine,
        ctx: &MovementContext,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let tracked = line_stock::lock_line(&mut tx, order_id, line.line_id).await?;
        if !tracked.is_some_and(|t| t.state.holds_reservation()) {
            // Someone else already moved this line on; nothing of ours is left
            return Ok(());
        }

        stock::release_in(&mut tx, line.product_id, line.warehouse_id, line.quantity, ctx).await?;
        line_stock::set_state(&mut tx, order_id, line.line_id, LineStockState::Unreserved).await?;
        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Confirm / Cancel / Refund
    // =========================================================================

    /// Turns every reserved line into a deduction (`fulfil`).
    ///
    /// ## Errors
    /// - `IllegalTransition` if any line was already fulfilled or restocked
    /// - `InvariantViolation` (fatal) if a row holds fewer reserved units
    ///   than the line
    #[instrument(skip(self))]
    pub async fn confirm_order(&self, order_id: i64) -> DbResult<OrderStockReport> {
        self.transition(order_id, Settle::Confirm).await
    }

    /// Releases every reserved line. Calling it again is harmless.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: i64) -> DbResult<OrderStockReport> {
        self.transition(order_id, Settle::Cancel).await
    }

    /// Puts every fulfilled line back on the shelf (`restock`).
    ///
    /// Lines still reserved or never reserved are skipped. A second refund
    /// is rejected with `IllegalTransition`.
    #[instrument(skip(self))]
    pub async fn refund_order(&self, order_id: i64) -> DbResult<OrderStockReport> {
        self.transition(order_id, Settle::Refund).await
    }

    async fn transition(&self, order_id: i64, settle: Settle) -> DbResult<OrderStockReport> {
        let action = settle.action();
        let tracked = self.line_states(order_id).await?;
        let plan = plan_transition(order_id, tracked, action)?;

        let mut report = OrderStockReport::new(order_id, action);
        if !plan.skipped.is_empty() {
            warn!(%action, skipped = ?plan.skipped, "Lines skipped by order action");
            report.skipped = plan.skipped;
        }

        let ctx = MovementContext::for_order(order_id);

        for (line, next) in plan.lines {
            if let Err(err) = self.transition_line(&line, next, settle, &ctx).await {
                if err.is_fatal() {
                    error!(
                        %action,
                        line_id = line.line_id,
                        product_id = line.product_id,
                        warehouse_id = line.warehouse_id,
                        qty = line.quantity,
                        applied = report.applied.len(),
                        error = %err,
                        "Order stock action aborted on a data integrity failure"
                    );
                }
                return Err(err);
            }

            report.applied.push(LineOutcome {
                line_id: line.line_id,
                product_id: line.product_id,
                warehouse_id: line.warehouse_id,
                quantity: line.quantity,
                state: next,
            });
        }

        info!(
            %action,
            lines = report.applied.len(),
            units = report.units(),
            "Order stock action applied"
        );
        Ok(report)
    }

    async fn transition_line(
        &self,
        line: &TrackedLine,
        next: LineStockState,
        settle: Settle,
        ctx: &MovementContext,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        // The plan was read outside this transaction; re-check under the lock
        let current = line_stock::lock_line(&mut tx, line.order_id, line.line_id)
            .await?
            .map(|l| l.state)
            .unwrap_or_default();
        if current != line.state {
            return Err(CoreError::IllegalTransition {
                order_id: line.order_id,
                line_id: line.line_id,
                state: current,
                action: settle.action(),
            }
            .into());
        }

        let (product_id, warehouse_id, qty) = (line.product_id, line.warehouse_id, line.quantity);
        match settle {
            Settle::Confirm => {
                stock::fulfil_in(&mut tx, product_id, warehouse_id, qty, ctx).await?;
            }
            Settle::Cancel => {
                stock::release_in(&mut tx, product_id, warehouse_id, qty, ctx).await?;
            }
            Settle::Refund => {
                stock::restock_in(&mut tx, product_id, warehouse_id, qty, ctx).await?;
            }
        }

        line_stock::set_state(&mut tx, line.order_id, line.line_id, next).await?;
        tx.commit().await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::order_line::SqliteOrderLineSource;

    async fn setup() -> (Database, ReservationEngine<SqliteOrderLineSource>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.ledger().create_row(1, 1, 100).await.unwrap();
        let engine = db.reservations();
        (db, engine)
    }

    async fn level(db: &Database) -> (i64, i64) {
        let level = db.ledger().get_available(1, 1).await.unwrap();
        (level.quantity, level.reserved)
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (db, engine) = setup().await;
        db.order_lines().insert(5, 1, Some(1), 30).await.unwrap();

        let report = engine.reserve_order(5).await.unwrap();
        assert_eq!(report.units(), 30);
        assert_eq!(level(&db).await, (100, 30));

        engine.confirm_order(5).await.unwrap();
        assert_eq!(level(&db).await, (70, 0));

        engine.refund_order(5).await.unwrap();
        assert_eq!(level(&db).await, (100, 0));

        let states: Vec<_> = engine
            .line_states(5)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.state)
            .collect();
        assert_eq!(states, vec![LineStockState::Restocked]);
    }

    #[tokio::test]
    async fn test_double_actions_rejected() {
        let (db, engine) = setup().await;
        db.order_lines().insert(5, 1, Some(1), 30).await.unwrap();

        engine.reserve_order(5).await.unwrap();
        let err = engine.reserve_order(5).await.unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(CoreError::IllegalTransition {
                action: StockAction::Reserve,
                ..
            })
        ));
        assert_eq!(level(&db).await, (100, 30));

        engine.confirm_order(5).await.unwrap();
        assert!(engine.confirm_order(5).await.is_err());
        assert_eq!(level(&db).await, (70, 0));

        engine.refund_order(5).await.unwrap();
        assert!(engine.refund_order(5).await.is_err());
        assert_eq!(level(&db).await, (100, 0));
    }

    #[tokio::test]
    async fn test_failed_line_rolls_back_earlier_lines() {
        let (db, engine) = setup().await;
        db.ledger().create_row(2, 1, 5).await.unwrap();
        db.order_lines().insert(5, 1, Some(1), 30).await.unwrap();
        db.order_lines().insert(5, 2, Some(1), 6).await.unwrap();

        let err = engine.reserve_order(5).await.unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(CoreError::InsufficientStock {
                product_id: 2,
                available: 5,
                requested: 6,
                ..
            })
        ));

        assert_eq!(level(&db).await, (100, 0));
        assert!(engine
            .line_states(5)
            .await
            .unwrap()
            .iter()
            .all(|l| l.state == LineStockState::Unreserved));

        // after restocking, the same order can be reserved
        db.ledger().restock(2, 1, 1).await.unwrap();
        engine.reserve_order(5).await.unwrap();
        assert_eq!(level(&db).await, (100, 30));
    }

    #[tokio::test]
    async fn test_rejection_names_failing_line() {
        let (db, engine) = setup().await;
        let first = db.order_lines().insert(5, 1, Some(1), 60).await.unwrap();
        let second = db.order_lines().insert(5, 1, Some(1), 60).await.unwrap();

        let err = engine.reserve_order(5).await.unwrap_err();
        assert_eq!(err.failed_line(), Some(second));
        assert_ne!(err.failed_line(), Some(first));
        assert!(err.is_insufficient_stock());
        assert!(err.to_string().contains(&format!("line {second}")));

        assert_eq!(level(&db).await, (100, 0));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (db, engine) = setup().await;
        db.order_lines().insert(5, 1, Some(1), 30).await.unwrap();

        engine.reserve_order(5).await.unwrap();
        let first = engine.cancel_order(5).await.unwrap();
        let second = engine.cancel_order(5).await.unwrap();

        assert_eq!(first.units(), 30);
        assert_eq!(second.units(), 0);
        assert_eq!(level(&db).await, (100, 0));
    }

    #[tokio::test]
    async fn test_unassigned_lines_are_flagged() {
        let (db, engine) = setup().await;
        db.order_lines().insert(5, 1, Some(1), 10).await.unwrap();
        let unassigned = db.order_lines().insert(5, 1, None, 4).await.unwrap();

        let report = engine.reserve_order(5).await.unwrap();
        assert_eq!(report.unassigned, vec![unassigned]);
        assert!(report.needs_assignment());
        assert_eq!(level(&db).await, (100, 10));
    }

    #[tokio::test]
    async fn test_status_change_dispatch() {
        let (db, engine) = setup().await;
        db.order_lines().insert(5, 1, Some(1), 30).await.unwrap();

        engine
            .on_status_change(5, None, OrderStatus::Created)
            .await
            .unwrap();
        engine
            .on_status_change(5, Some(OrderStatus::Created), OrderStatus::Paid)
            .await
            .unwrap();
        let none = engine
            .on_status_change(5, Some(OrderStatus::Paid), OrderStatus::Shipped)
            .await
            .unwrap();
        assert!(none.is_none());

        engine
            .on_status_change(5, Some(OrderStatus::Shipped), OrderStatus::Refunded)
            .await
            .unwrap();
        assert_eq!(level(&db).await, (100, 0));
    }

    #[tokio::test]
    async fn test_order_movements_are_correlated() {
        let (db, engine) = setup().await;
        db.order_lines().insert(5, 1, Some(1), 30).await.unwrap();

        engine.reserve_order(5).await.unwrap();
        engine.cancel_order(5).await.unwrap();

        let movements = db.movements().list_for_order(5).await.unwrap();
        let deltas: Vec<_> = movements.iter().map(|m| m.reserved_delta).collect();
        assert_eq!(deltas, vec![30, -30]);
    }
}
