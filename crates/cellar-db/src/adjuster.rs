//! # Order-Item Reservation Adjuster
//!
//! Keeps a line's reservation in step when the order service edits or
//! removes the line after it was reserved.
//!
//! ## Edit Cases
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  old (w1, 30)  →  new (w1, 45)     reserve(w1, +15)          one tx    │
//! │  old (w1, 30)  →  new (w1, 10)     release(w1, 20)           one tx    │
//! │  old (w1, 30)  →  new (w2, 30)     release(w1, 30) ── tx 1             │
//! │                                    reserve(w2, 30) ── tx 2             │
//! │  old (w1, 30)  →  new (none, 30)   release(w1, 30)           one tx    │
//! │  delete line                       release(w1, 30)           one tx    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Warehouse Reassignment
//! The release from the old warehouse commits before the reserve in the new
//! one is attempted. If the reserve fails the release stays: the line is
//! left holding no reservation and the caller gets
//! [`DbError::ReassignmentIncomplete`], which is fatal and logged.
//!
//! ## Tracked Placement Wins
//! The release side always uses the warehouse and quantity the engine
//! recorded when it reserved the line. A caller-supplied `old` placement
//! that disagrees is logged and ignored.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{DbError, DbResult};
use crate::repository::line_stock;
use crate::repository::movement::MovementContext;
use crate::repository::stock;
use cellar_core::validation::validate_line_quantity;
use cellar_core::{CoreError, LinePlacement, LineStockState, PlannedLine, StockAction, TrackedLine};

/// What an edit did to the line's reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdjustOutcome {
    /// Placement unchanged.
    Unchanged,
    /// The line holds no reservation (never reserved, or cancelled); the
    /// ledger was not touched.
    Untracked,
    /// Same warehouse, different quantity.
    Resized {
        warehouse_id: i64,
        from_quantity: i64,
        to_quantity: i64,
    },
    /// Reservation moved to another warehouse.
    Moved {
        from_warehouse: i64,
        to_warehouse: i64,
        quantity: i64,
    },
    /// Reservation dropped (warehouse removed or line deleted).
    Released { warehouse_id: i64, quantity: i64 },
    /// A previously unassigned line was reserved.
    Reserved { warehouse_id: i64, quantity: i64 },
}

/// Reconciles reservations for edited order lines.
#[derive(Debug, Clone)]
pub struct OrderItemAdjuster {
    pool: SqlitePool,
}

impl OrderItemAdjuster {
    /// Creates a new OrderItemAdjuster.
    pub fn new(pool: SqlitePool) -> Self {
        OrderItemAdjuster { pool }
    }

    /// Reconciles one line after the order service changed its placement.
    ///
    /// ## Errors
    /// - `InsufficientStock` when growing the line or moving it fails; for a
    ///   same-warehouse resize nothing changed
    /// - `ReassignmentIncomplete` (fatal) when the old warehouse was released
    ///   but the new one could not be reserved
    /// - `LineSettled` when the line was already fulfilled or restocked
    #[instrument(skip(self))]
    pub async fn edit_line(
        &self,
        order_id: i64,
        line_id: i64,
        product_id: i64,
        old: LinePlacement,
        new: LinePlacement,
    ) -> DbResult<AdjustOutcome> {
        validate_line_quantity(new.quantity)?;

        let ctx = MovementContext::for_order(order_id);
        let mut tx = self.pool.begin().await?;

        let Some(tracked) = line_stock::lock_line(&mut tx, order_id, line_id).await? else {
            debug!("Line holds no reservation, nothing to adjust");
            return Ok(AdjustOutcome::Untracked);
        };
        ensure_editable(&tracked)?;
        if !tracked.state.holds_reservation() {
            debug!(state = %tracked.state, "Line holds no reservation, nothing to adjust");
            return Ok(AdjustOutcome::Untracked);
        }

        if tracked.product_id != product_id {
            warn!(
                tracked_product = tracked.product_id,
                product_id, "Line product differs from the reserved one; using the reserved one"
            );
        }
        if old.warehouse_id != Some(tracked.warehouse_id) || old.quantity != tracked.quantity {
            warn!(
                ?old,
                tracked_warehouse = tracked.warehouse_id,
                tracked_quantity = tracked.quantity,
                "Caller's old placement differs from the reserved one; using the reserved one"
            );
        }

        let (warehouse_id, quantity) = (tracked.warehouse_id, tracked.quantity);

        match new.warehouse_id {
            // Same warehouse: one transaction, all or nothing
            Some(target) if target == warehouse_id => {
                let delta = new.quantity - quantity;
                if delta == 0 {
                    return Ok(AdjustOutcome::Unchanged);
                }

                if delta > 0 {
                    stock::reserve_in(&mut tx, tracked.product_id, warehouse_id, delta, &ctx).await?;
                } else {
                    stock::release_in(&mut tx, tracked.product_id, warehouse_id, -delta, &ctx).await?;
                }
                line_stock::set_placement(
                    &mut tx,
                    order_id,
                    line_id,
                    warehouse_id,
                    new.quantity,
                    LineStockState::Reserved,
                )
                .await?;
                tx.commit().await?;

                info!(warehouse_id, from = quantity, to = new.quantity, "Line reservation resized");
                Ok(AdjustOutcome::Resized {
                    warehouse_id,
                    from_quantity: quantity,
                    to_quantity: new.quantity,
                })
            }

            // Warehouse removed: release only
            None => {
                stock::release_in(&mut tx, tracked.product_id, warehouse_id, quantity, &ctx).await?;
                line_stock::set_state(&mut tx, order_id, line_id, LineStockState::Unreserved)
                    .await?;
                tx.commit().await?;

                info!(warehouse_id, quantity, "Line warehouse removed, reservation released");
                Ok(AdjustOutcome::Released {
                    warehouse_id,
                    quantity,
                })
            }

            // Warehouse changed: release, commit, then reserve elsewhere
            Some(target) => {
                stock::release_in(&mut tx, tracked.product_id, warehouse_id, quantity, &ctx).await?;
                line_stock::set_state(&mut tx, order_id, line_id, LineStockState::Unreserved)
                    .await?;
                tx.commit().await?;

                let line = PlannedLine {
                    line_id,
                    product_id: tracked.product_id,
                    warehouse_id: target,
                    quantity: new.quantity,
                };
                if let Err(source) = self.claim_and_reserve(order_id, &line, &ctx).await {
                    error!(
                        product_id = tracked.product_id,
                        released_from = warehouse_id,
                        released = quantity,
                        target_warehouse = target,
                        requested = new.quantity,
                        error = %source,
                        "Line released from its old warehouse but not reserved in the new one"
                    );
                    return Err(DbError::ReassignmentIncomplete {
                        order_id,
                        line_id,
                        released_from: warehouse_id,
                        released: quantity,
                        target_warehouse: target,
                        source: Box::new(source),
                    });
                }

                info!(from = warehouse_id, to = target, quantity = new.quantity, "Line reservation moved");
                Ok(AdjustOutcome::Moved {
                    from_warehouse: warehouse_id,
                    to_warehouse: target,
                    quantity: new.quantity,
                })
            }
        }
    }

    /// Reserves a line that had no warehouse when its order was reserved.
    ///
    /// ## Errors
    /// - `IllegalTransition` if the line already holds or consumed stock
    /// - `InsufficientStock` / `StockRowNotFound` from the ledger
    #[instrument(skip(self))]
    pub async fn assign_line(
        &self,
        order_id: i64,
        line_id: i64,
        product_id: i64,
        warehouse_id: i64,
        quantity: i64,
    ) -> DbResult<AdjustOutcome> {
        let line = PlannedLine {
            line_id,
            product_id,
            warehouse_id,
            quantity,
        };
        self.claim_and_reserve(order_id, &line, &MovementContext::for_order(order_id))
            .await?;

        info!(warehouse_id, quantity, "Unassigned line reserved");
        Ok(AdjustOutcome::Reserved {
            warehouse_id,
            quantity,
        })
    }

    /// Releases a deleted line's reservation and stops tracking it.
    #[instrument(skip(self))]
    pub async fn delete_line(&self, order_id: i64, line_id: i64) -> DbResult<AdjustOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(tracked) = line_stock::lock_line(&mut tx, order_id, line_id).await? else {
            return Ok(AdjustOutcome::Untracked);
        };
        ensure_editable(&tracked)?;

        let outcome = if tracked.state.holds_reservation() {
            stock::release_in(
                &mut tx,
                tracked.product_id,
                tracked.warehouse_id,
                tracked.quantity,
                &MovementContext::for_order(order_id),
            )
            .await?;
            AdjustOutcome::Released {
                warehouse_id: tracked.warehouse_id,
                quantity: tracked.quantity,
            }
        } else {
            AdjustOutcome::Untracked
        };

        line_stock::remove(&mut tx, order_id, line_id).await?;
        tx.commit().await?;

        info!(?outcome, "Order line deleted");
        Ok(outcome)
    }

    async fn claim_and_reserve(
        &self,
        order_id: i64,
        line: &PlannedLine,
        ctx: &MovementContext,
    ) -> DbResult<()> {
        validate_line_quantity(line.quantity)?;

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
}

fn ensure_editable(line: &TrackedLine) -> DbResult<()> {
    match line.state {
        LineStockState::Fulfilled | LineStockState::Restocked => Err(CoreError::LineSettled {
            order_id: line.order_id,
            line_id: line.line_id,
            state: line.state,
        }
        .into()),
        LineStockState::Unreserved | LineStockState::Reserved => Ok(()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
