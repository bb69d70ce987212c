//! End-to-end stock scenarios against a real SQLite database.

use cellar_core::{CoreError, LinePlacement, LineStockState, MovementKind, OrderStatus};
use cellar_db::{Database, DbConfig, DbError};

async fn memory_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

async fn file_db(max_connections: u32) -> (Database, std::path::PathBuf) {
    let path = std::env::temp_dir().join(format!("cellar-it-{}.db", uuid::Uuid::new_v4()));
    let db = Database::new(DbConfig::new(path.clone()).max_connections(max_connections))
        .await
        .unwrap();
    (db, path)
}

async fn row(db: &Database, product_id: i64, warehouse_id: i64) -> (i64, i64) {
    let level = db
        .ledger()
        .get_available(product_id, warehouse_id)
        .await
        .unwrap();
    (level.quantity, level.reserved)
}

#[tokio::test]
async fn order_reserve_confirm_refund() {
    let db = memory_db().await;
    db.ledger().create_row(1, 1, 100).await.unwrap();
    db.order_lines().insert(5, 1, Some(1), 30).await.unwrap();
    let engine = db.reservations();

    engine.reserve_order(5).await.unwrap();
    let level = db.ledger().get_available(1, 1).await.unwrap();
    assert_eq!((level.reserved, level.available), (30, 70));

    engine.confirm_order(5).await.unwrap();
    assert_eq!(row(&db, 1, 1).await, (70, 0));

    engine.refund_order(5).await.unwrap();
    assert_eq!(row(&db, 1, 1).await, (100, 0));

    let kinds: Vec<_> = db
        .movements()
        .list_for_order(5)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![MovementKind::Reserve, MovementKind::Fulfil, MovementKind::Restock]
    );
}

#[tokio::test]
async fn oversized_line_leaves_row_unchanged() {
    let db = memory_db().await;
    db.ledger().create_row(1, 1, 100).await.unwrap();
    db.order_lines().insert(5, 1, Some(1), 150).await.unwrap();

    let err = db.reservations().reserve_order(5).await.unwrap_err();

    assert!(err.is_insufficient_stock());
    assert_eq!(row(&db, 1, 1).await, (100, 0));
}

#[tokio::test]
async fn two_lines_on_one_row_then_competing_order() {
    let db = memory_db().await;
    db.ledger().create_row(1, 1, 100).await.unwrap();
    db.order_lines().insert(5, 1, Some(1), 30).await.unwrap();
    db.order_lines().insert(5, 1, Some(1), 30).await.unwrap();
    db.order_lines().insert(6, 1, Some(1), 50).await.unwrap();
    let engine = db.reservations();

    let report = engine.reserve_order(5).await.unwrap();
    assert_eq!(report.units(), 60);
    assert_eq!(row(&db, 1, 1).await, (100, 60));

    let err = engine.reserve_order(6).await.unwrap_err();
    assert!(matches!(
        err.as_domain(),
        Some(CoreError::InsufficientStock {
            available: 40,
            requested: 50,
            ..
        })
    ));
    assert_eq!(row(&db, 1, 1).await, (100, 60));
}

#[tokio::test]
async fn transfer_exact_and_one_too_many() {
    let db = memory_db().await;
    db.ledger().create_row(1, 1, 10).await.unwrap();
    db.ledger().create_row(1, 2, 4).await.unwrap();
    let transfers = db.transfers();

    let err = transfers.transfer(1, 1, 2, 11, "rebalance").await.unwrap_err();
    assert!(err.is_insufficient_stock());
    assert_eq!(row(&db, 1, 1).await, (10, 0));
    assert_eq!(row(&db, 1, 2).await, (4, 0));

    transfers.transfer(1, 1, 2, 10, "rebalance").await.unwrap();
    assert_eq!(row(&db, 1, 1).await, (0, 0));
    assert_eq!(row(&db, 1, 2).await, (14, 0));
}

#[tokio::test]
async fn concurrent_orders_never_oversell() {
    let (db, path) = file_db(8).await;
    db.ledger().create_row(1, 1, 50).await.unwrap();

    // 20 orders of 5 units against 50 available: exactly 10 can win
    for order_id in 1..=20 {
        db.order_lines().insert(order_id, 1, Some(1), 5).await.unwrap();
    }

    let mut handles = Vec::new();
    for order_id in 1..=20 {
        let engine = db.reservations();
        handles.push(tokio::spawn(async move { engine.reserve_order(order_id).await }));
    }

    let mut reserved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => reserved += 1,
            Err(err) => assert!(err.is_insufficient_stock(), "unexpected: {err}"),
        }
    }

    assert_eq!(reserved, 10);
    assert_eq!(row(&db, 1, 1).await, (50, 50));
    assert!(db.ledger().check_invariants().await.unwrap().is_empty());

    db.close().await;
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn concurrent_confirm_applies_once() {
    let (db, path) = file_db(4).await;
    db.ledger().create_row(1, 1, 100).await.unwrap();
    db.ledger().create_row(2, 1, 100).await.unwrap();
    db.order_lines().insert(5, 1, Some(1), 30).await.unwrap();
    db.order_lines().insert(5, 2, Some(1), 10).await.unwrap();
    // a second order keeps reserved units on the row, so a duplicate
    // fulfil would not be caught by reserved < qty alone
    db.order_lines().insert(6, 1, Some(1), 30).await.unwrap();

    let engine = db.reservations();
    engine.reserve_order(5).await.unwrap();
    engine.reserve_order(6).await.unwrap();

    let a = {
        let engine = db.reservations();
        tokio::spawn(async move { engine.confirm_order(5).await })
    };
    let b = {
        let engine = db.reservations();
        tokio::spawn(async move { engine.confirm_order(5).await })
    };
    let _ = a.await.unwrap();
    let _ = b.await.unwrap();

    assert_eq!(row(&db, 1, 1).await, (70, 30));
    assert_eq!(row(&db, 2, 1).await, (90, 0));

    db.close().await;
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn edited_line_is_what_gets_confirmed() {
    let db = memory_db().await;
    db.ledger().create_row(1, 1, 100).await.unwrap();
    db.ledger().create_row(1, 2, 100).await.unwrap();
    let source = db.order_lines();
    let line = source.insert(5, 1, Some(1), 30).await.unwrap();
    let engine = db.reservations();

    engine
        .on_status_change(5, None, OrderStatus::Created)
        .await
        .unwrap();

    source.update(line, Some(2), 20).await.unwrap();
    db.adjuster()
        .edit_line(5, line, 1, LinePlacement::new(1, 30), LinePlacement::new(2, 20))
        .await
        .unwrap();

    engine
        .on_status_change(5, Some(OrderStatus::Created), OrderStatus::Paid)
        .await
        .unwrap();

    assert_eq!(row(&db, 1, 1).await, (100, 0));
    assert_eq!(row(&db, 1, 2).await, (80, 0));

    let states = engine.line_states(5).await.unwrap();
    assert_eq!(states[0].state, LineStockState::Fulfilled);
    assert_eq!(states[0].warehouse_id, 2);
}

#[tokio::test]
async fn failed_reassignment_surfaces_fatal_error() {
    let db = memory_db().await;
    db.ledger().create_row(1, 1, 100).await.unwrap();
    db.ledger().create_row(1, 2, 5).await.unwrap();
    let line = db.order_lines().insert(5, 1, Some(1), 30).await.unwrap();
    db.reservations().reserve_order(5).await.unwrap();

    let err = db
        .adjuster()
        .edit_line(5, line, 1, LinePlacement::new(1, 30), LinePlacement::new(2, 30))
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    match &err {
        DbError::ReassignmentIncomplete { source, .. } => assert!(source.is_insufficient_stock()),
        other => panic!("expected ReassignmentIncomplete, got {other:?}"),
    }
    assert_eq!(row(&db, 1, 1).await, (100, 0));
    assert_eq!(row(&db, 1, 2).await, (5, 0));
}
