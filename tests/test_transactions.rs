//! Distributed-transaction scenarios through the public facade
//!
//! Statement execution on a transaction-bound connection must enlist the
//! connection's XA resource before delegating; commit and rollback drive
//! end/commit/rollback on every enlisted branch; suspend/resume carries
//! enlisted resources across an inner transaction.


use dbpool::datasource::{EndFlag, MockDataSource, XaEvent};
use dbpool::{PoolError, TransactionCoordinator, TxStatus};
use test_helpers::{facade_with_source, pool_config};

#[tokio::test]
async fn test_execute_update_enlists_and_commit_delists() {
    let (ds, source) =
        facade_with_source(pool_config("xa", 1, 2), MockDataSource::new_xa()).await;
    let coordinator = TransactionCoordinator::new();

    coordinator.begin().await.unwrap();
    let conn = ds.get_connection_tx("xa", &coordinator).await.unwrap();
    assert!(conn.is_transactional());

    let mut stmt = conn.create_statement();
    stmt.execute_update("INSERT INTO t (id) VALUES (1)")
        .await
        .unwrap();

    // The resource was enlisted exactly once, before delegation.
    let events = source.xa_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], XaEvent::Start(_)));

    coordinator.commit().await.unwrap();
    let events = source.xa_events();
    assert!(matches!(events[1], XaEvent::End(_, EndFlag::Success)));
    assert!(matches!(events[2], XaEvent::Commit { one_phase: true, .. }));

    // Post-commit, the same caller's slot is empty.
    assert_eq!(coordinator.status().await, None);
    drop(conn);
    ds.shutdown();
}

#[tokio::test]
async fn test_repeated_execution_enlists_once_per_transaction() {
    let (ds, source) =
        facade_with_source(pool_config("xa", 1, 2), MockDataSource::new_xa()).await;
    let coordinator = TransactionCoordinator::new();

    coordinator.begin().await.unwrap();
    let conn = ds.get_connection_tx("xa", &coordinator).await.unwrap();
    let mut stmt = conn.create_statement();
    stmt.execute("INSERT INTO t (id) VALUES (1)").await.unwrap();
    stmt.execute_batch(&["INSERT INTO t (id) VALUES (2)", "DELETE FROM t"])
        .await
        .unwrap();
    coordinator.rollback().await.unwrap();

    let starts = source
        .xa_events()
        .iter()
        .filter(|e| matches!(e, XaEvent::Start(_)))
        .count();
    assert_eq!(starts, 1);
    assert!(source
        .xa_events()
        .iter()
        .any(|e| matches!(e, XaEvent::End(_, EndFlag::Fail))));
    assert!(source
        .xa_events()
        .iter()
        .any(|e| matches!(e, XaEvent::Rollback(_))));
    drop(conn);
    ds.shutdown();
}

#[tokio::test]
async fn test_execution_outside_transaction_does_not_enlist() {
    let (ds, source) =
        facade_with_source(pool_config("xa", 1, 2), MockDataSource::new_xa()).await;
    let coordinator = TransactionCoordinator::new();

    // Bound to a coordinator whose slot is empty: plain execution.
    let conn = ds.get_connection_tx("xa", &coordinator).await.unwrap();
    let mut stmt = conn.create_statement();
    stmt.execute_update("UPDATE t SET n = 0").await.unwrap();

    assert!(source.xa_events().is_empty());
    drop(conn);
    ds.shutdown();
}

#[tokio::test]
async fn test_suspend_runs_inner_work_outside_transaction() {
    let (ds, source) =
        facade_with_source(pool_config("xa", 1, 2), MockDataSource::new_xa()).await;
    let coordinator = TransactionCoordinator::new();

    coordinator.begin().await.unwrap();
    let conn = ds.get_connection_tx("xa", &coordinator).await.unwrap();
    let mut stmt = conn.create_statement();
    stmt.execute("INSERT INTO t (id) VALUES (1)").await.unwrap();

    let suspended = coordinator.suspend().await.unwrap();
    assert_eq!(coordinator.status().await, None);

    // Work done while suspended runs outside the transaction: no new
    // enlistment happens.
    stmt.execute("INSERT INTO t (id) VALUES (2)").await.unwrap();
    let starts = source
        .xa_events()
        .iter()
        .filter(|e| matches!(e, XaEvent::Start(_)))
        .count();
    assert_eq!(starts, 1);

    coordinator.resume(suspended).await.unwrap();
    assert_eq!(coordinator.status().await, Some(TxStatus::Active));
    coordinator.commit().await.unwrap();

    // The branch enlisted before the suspend was committed.
    assert!(source
        .xa_events()
        .iter()
        .any(|e| matches!(e, XaEvent::Commit { .. })));
    drop(conn);
    ds.shutdown();
}

#[tokio::test]
async fn test_enlistment_failure_surfaces_as_transaction_error() {
    let (ds, source) =
        facade_with_source(pool_config("xa", 1, 2), MockDataSource::new_xa()).await;
    source.set_fail_xa_start(true);
    let coordinator = TransactionCoordinator::new();

    coordinator.begin().await.unwrap();
    let conn = ds.get_connection_tx("xa", &coordinator).await.unwrap();
    let mut stmt = conn.create_statement();
    let err = stmt
        .execute_update("INSERT INTO t (id) VALUES (1)")
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Transaction(_)));

    // Nothing was delegated to the driver.
    assert!(source.connections()[0].executed().is_empty());
    coordinator.rollback().await.unwrap();
    drop(conn);
    ds.shutdown();
}

#[tokio::test]
async fn test_plain_pool_ignores_coordinator() {
    let (ds, source) = facade_with_source(pool_config("plain", 1, 2), MockDataSource::new()).await;
    let coordinator = TransactionCoordinator::new();

    coordinator.begin().await.unwrap();
    let conn = ds.get_connection_tx("plain", &coordinator).await.unwrap();
    assert!(!conn.is_transactional());

    let mut stmt = conn.create_statement();
    stmt.execute_update("UPDATE t SET n = 1").await.unwrap();
    assert!(source.xa_events().is_empty());

    coordinator.commit().await.unwrap();
    drop(conn);
    ds.shutdown();
}
