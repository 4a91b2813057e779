// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transaction scopes and connection lifecycle through the service API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use thunder_core::{SqlValue, ThunderError};
use thunder_storage::MemoryBlockStore;
use thunder_worker::{DatabaseService, OpenOptions};

use common::service_on;

async fn service_with_table() -> (Arc<DatabaseService>, thunder_core::ConnectionId) {
    let service = service_on(Arc::new(MemoryBlockStore::new())).await;
    let id = service.open("ledger.db", OpenOptions::default()).await.unwrap();
    service
        .database(id)
        .unwrap()
        .execute(
            None,
            "CREATE TABLE entry (amount INTEGER NOT NULL)".into(),
            vec![],
            None,
        )
        .await
        .unwrap();
    (service, id)
}

async fn total(service: &DatabaseService, id: thunder_core::ConnectionId) -> SqlValue {
    let table = service
        .database(id)
        .unwrap()
        .query(None, "SELECT coalesce(sum(amount), 0) FROM entry".into(), vec![])
        .await
        .unwrap();
    table.rows[0][0].clone()
}

#[tokio::test]
async fn transaction_commits_on_success() {
    let (service, id) = service_with_table().await;
    let inserted = service
        .transaction(id, |tx| async move {
            tx.insert("INSERT INTO entry VALUES (?)", vec![SqlValue::Integer(10)]).await?;
            tx.insert("INSERT INTO entry VALUES (?)", vec![SqlValue::Integer(5)]).await
        })
        .await
        .unwrap();
    assert_eq!(inserted, Some(2));
    assert_eq!(total(&service, id).await, SqlValue::Integer(15));
}

#[tokio::test]
async fn transaction_rolls_back_on_error() {
    let (service, id) = service_with_table().await;
    let err = service
        .transaction(id, |tx| async move {
            tx.insert("INSERT INTO entry VALUES (?)", vec![SqlValue::Integer(10)]).await?;
            tx.insert("INSERT INTO entry VALUES (NULL)", vec![]).await
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("NOT NULL"));
    assert_eq!(total(&service, id).await, SqlValue::Integer(0));
}

#[tokio::test]
async fn other_callers_wait_for_the_whole_transaction() {
    let (service, id) = service_with_table().await;
    let db = service.database(id).unwrap();

    let outside = {
        let db = Arc::clone(&db);
        async move {
            // Give the transaction time to take the connection.
            tokio::time::sleep(Duration::from_millis(20)).await;
            db.query(None, "SELECT count(*) FROM entry".into(), vec![])
                .await
                .unwrap()
        }
    };
    let inside = service.transaction(id, |tx| async move {
        tx.insert("INSERT INTO entry VALUES (1)", vec![]).await?;
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.insert("INSERT INTO entry VALUES (2)", vec![]).await
    });

    let (seen, committed) = tokio::join!(outside, inside);
    committed.unwrap();
    assert_eq!(seen.rows, vec![vec![SqlValue::Integer(2)]]);
}

#[tokio::test]
async fn close_rejects_queued_work() {
    let (service, id) = service_with_table().await;
    let db = service.database(id).unwrap();
    let guard = db.executor().acquire(None).await.unwrap();

    let queued = {
        let db = Arc::clone(&db);
        tokio::spawn(async move { db.query(None, "SELECT 1".into(), vec![]).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let closing = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.close(id).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(guard);

    closing.await.unwrap().unwrap();
    let err = queued.await.unwrap().unwrap_err();
    assert!(matches!(err, ThunderError::DatabaseClosed { .. }));
    assert_eq!(service.open_connections(), 0);
}

#[tokio::test]
async fn read_only_open_of_missing_database_fails() {
    let service = service_on(Arc::new(MemoryBlockStore::new())).await;
    let err = service
        .open(
            "absent.db",
            OpenOptions {
                read_only: true,
                single_instance: false,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(rusqlite::ffi::SQLITE_CANTOPEN));
    assert_eq!(service.open_connections(), 0);
}

#[tokio::test]
async fn shutdown_closes_everything() {
    let (service, _) = service_with_table().await;
    service.open("second.db", OpenOptions::default()).await.unwrap();
    assert_eq!(service.open_connections(), 2);
    service.shutdown().await.unwrap();
    assert_eq!(service.open_connections(), 0);
}
