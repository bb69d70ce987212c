//! # Order Line Source
//!
//! Where the reservation engine gets an order's lines from.
//!
//! The order service owns `order_items`; this crate only reads it. Services
//! that keep their lines elsewhere implement [`OrderLineSource`] themselves.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use cellar_core::OrderLine;

/// Supplies the lines of an order.
#[async_trait]
pub trait OrderLineSource: Send + Sync {
    /// Every line of the order, in any order. An unknown order has no lines.
    async fn lines_for_order(&self, order_id: i64) -> DbResult<Vec<OrderLine>>;
}

/// [`OrderLineSource`] over the `order_items` table.
#[derive(Debug, Clone)]
pub struct SqliteOrderLineSource {
    pool: SqlitePool,
}

impl SqliteOrderLineSource {
    /// Creates a new SqliteOrderLineSource.
    pub fn new(pool: SqlitePool) -> Self {
        SqliteOrderLineSource { pool }
    }

    /// Inserts an order line and returns its id.
    ///
    /// The order service normally writes these; the seed binary and tests
    /// use this to stand one up.
    pub async fn insert(
        &self,
        order_id: i64,
        product_id: i64,
        warehouse_id: Option<i64>,
        quantity: i64,
    ) -> DbResult<i64> {
        let line_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO order_items (order_id, product_id, warehouse_id, quantity)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING id
            "#,
        )
        .bind(order_id)
        .bind(product_id)
        .bind(warehouse_id)
        .bind(quantity)
        .fetch_one(&self.pool)
        .await?;

        debug!(order_id, line_id, product_id, ?warehouse_id, quantity, "Inserted order line");
        Ok(line_id)
    }

    /// Updates a line's warehouse and quantity, as an order edit would.
    pub async fn update(
        &self,
        line_id: i64,
        warehouse_id: Option<i64>,
        quantity: i64,
    ) -> DbResult<()> {
        sqlx::query("UPDATE order_items SET warehouse_id = ?2, quantity = ?3 WHERE id = ?1")
            .bind(line_id)
            .bind(warehouse_id)
            .bind(quantity)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl OrderLineSource for SqliteOrderLineSource {
    async fn lines_for_order(&self, order_id: i64) -> DbResult<Vec<OrderLine>> {
        let lines = sqlx::query_as::<_, OrderLine>(
            r#"
            SELECT id AS line_id, order_id, product_id, warehouse_id, quantity
            FROM order_items
            WHERE order_id = ?1
            ORDER BY id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_lines_round_trip_through_order_items() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let source = db.order_lines();

        let first = source.insert(5, 1, Some(1), 30).await.unwrap();
        let second = source.insert(5, 2, None, 4).await.unwrap();
        source.insert(6, 1, Some(1), 1).await.unwrap();

        let lines = source.lines_for_order(5).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line_id, first);
        assert_eq!(lines[1].line_id, second);
        assert_eq!(lines[1].warehouse_id, None);

        assert!(source.lines_for_order(99).await.unwrap().is_empty());
    }
}
