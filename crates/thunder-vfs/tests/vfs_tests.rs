// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests driving the VFS through a real SQLite connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::{Connection, ErrorCode, OpenFlags};

use thunder_core::BlockStore;
use thunder_storage::{MemoryBlockStore, SqliteBlockStore};
use thunder_vfs::{BlockFileSystem, VfsOptions, journal_path};

static NEXT_VFS: AtomicU64 = AtomicU64::new(0);

fn options() -> VfsOptions {
    VfsOptions {
        name: format!(
            "thunder-vfs-test-{}-{}",
            std::process::id(),
            NEXT_VFS.fetch_add(1, Ordering::SeqCst)
        ),
        max_idle_files: 4,
    }
}

async fn mount(store: &Arc<dyn BlockStore>, path: &str) -> Arc<BlockFileSystem> {
    let fs = BlockFileSystem::open(Arc::clone(store), options()).await.unwrap();
    fs.preload(path).await.unwrap();
    fs.preload(&journal_path(path)).await.unwrap();
    fs
}

fn connect(fs: &BlockFileSystem, path: &str) -> rusqlite::Result<Connection> {
    Connection::open_with_flags_and_vfs(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        fs.vfs_name(),
    )
}

fn count_rows(conn: &Connection) -> i64 {
    conn.query_row("SELECT count(*) FROM t", [], |row| row.get(0))
        .unwrap()
}

#[tokio::test]
async fn database_survives_remount() {
    let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
    {
        let fs = mount(&store, "/app.db").await;
        let conn = connect(&fs, "/app.db").unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);
             INSERT INTO t (v) VALUES ('a'), ('b');",
        )
        .unwrap();
        conn.close().map_err(|(_, e)| e).unwrap();
        fs.flush().await.unwrap();
    }

    let file = store.file("/app.db").await.unwrap().expect("database persisted");
    assert!(file.length > 0);
    assert_eq!(file.length % 4096, 0);
    assert!(store.file("/app.db-journal").await.unwrap().is_none());

    let fs = mount(&store, "/app.db").await;
    let conn = connect(&fs, "/app.db").unwrap();
    assert_eq!(count_rows(&conn), 2);
}

#[tokio::test]
async fn changes_reach_the_store_only_on_flush() {
    let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
    let fs = mount(&store, "/lazy.db").await;
    let conn = connect(&fs, "/lazy.db").unwrap();
    conn.execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (1);")
        .unwrap();

    assert!(store.file("/lazy.db").await.unwrap().is_none());
    fs.flush().await.unwrap();
    assert!(store.file("/lazy.db").await.unwrap().is_some());
    assert!(!fs.core().has_pending().unwrap());
}

#[tokio::test]
async fn stored_database_must_be_preloaded() {
    let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
    {
        let fs = mount(&store, "/cold.db").await;
        let conn = connect(&fs, "/cold.db").unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER);").unwrap();
        drop(conn);
        fs.flush().await.unwrap();
    }

    let fs = BlockFileSystem::open(Arc::clone(&store), options()).await.unwrap();
    assert!(fs.exists("/cold.db").unwrap());
    let err = connect(&fs, "/cold.db")
        .and_then(|conn| conn.query_row("SELECT count(*) FROM t", [], |r| r.get::<_, i64>(0)))
        .unwrap_err();
    assert_eq!(err.sqlite_error_code(), Some(ErrorCode::CannotOpen));
}

#[tokio::test]
async fn competing_writers_get_busy() {
    let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
    let fs = mount(&store, "/shared.db").await;
    let first = connect(&fs, "/shared.db").unwrap();
    let second = connect(&fs, "/shared.db").unwrap();
    first.execute_batch("CREATE TABLE t (v INTEGER);").unwrap();

    first.execute_batch("BEGIN IMMEDIATE; INSERT INTO t VALUES (1);").unwrap();
    let err = second.execute_batch("BEGIN IMMEDIATE;").unwrap_err();
    assert_eq!(err.sqlite_error_code(), Some(ErrorCode::DatabaseBusy));

    first.execute_batch("COMMIT;").unwrap();
    second.execute_batch("BEGIN IMMEDIATE; INSERT INTO t VALUES (2); COMMIT;").unwrap();
    assert_eq!(count_rows(&first), 2);
}

#[tokio::test]
async fn export_and_import_whole_database() {
    let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
    let fs = mount(&store, "/source.db").await;
    {
        let conn = connect(&fs, "/source.db").unwrap();
        conn.execute_batch("CREATE TABLE t (v TEXT); INSERT INTO t VALUES ('x'), ('y'), ('z');")
            .unwrap();
    }
    fs.flush().await.unwrap();

    let bytes = fs.read_file("/source.db").await.unwrap().expect("source exists");
    fs.write_file("/copy.db", &bytes).await.unwrap();
    fs.preload("/copy.db").await.unwrap();

    let conn = connect(&fs, "/copy.db").unwrap();
    assert_eq!(count_rows(&conn), 3);
    assert_eq!(fs.read_file("/missing.db").await.unwrap(), None);
}

#[tokio::test]
async fn delete_file_removes_it_from_the_store() {
    let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
    let fs = mount(&store, "/doomed.db").await;
    {
        let conn = connect(&fs, "/doomed.db").unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER);").unwrap();
    }
    fs.flush().await.unwrap();
    fs.release("/doomed.db").unwrap();

    assert!(fs.delete_file("/doomed.db").await.unwrap());
    assert!(!fs.exists("/doomed.db").unwrap());
    assert!(store.file("/doomed.db").await.unwrap().is_none());
    assert!(!fs.delete_file("/doomed.db").await.unwrap());
}

#[tokio::test]
async fn persists_through_sqlite_block_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocks.db");
    {
        let store: Arc<dyn BlockStore> = Arc::new(SqliteBlockStore::open(&path).await.unwrap());
        let fs = mount(&store, "/durable.db").await;
        let conn = connect(&fs, "/durable.db").unwrap();
        conn.execute_batch(
            "CREATE TABLE t (v BLOB);
             INSERT INTO t VALUES (zeroblob(10000)), (zeroblob(20000));",
        )
        .unwrap();
        drop(conn);
        fs.flush().await.unwrap();
    }

    let store: Arc<dyn BlockStore> = Arc::new(SqliteBlockStore::open(&path).await.unwrap());
    let fs = mount(&store, "/durable.db").await;
    let conn = connect(&fs, "/durable.db").unwrap();
    let total: i64 = conn
        .query_row("SELECT sum(length(v)) FROM t", [], |row| row.get(0))
        .unwrap();
    assert_eq!(total, 30000);
}

#[tokio::test]
async fn temp_tables_stay_out_of_the_store() {
    let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
    let fs = mount(&store, "/scratch.db").await;
    let conn = connect(&fs, "/scratch.db").unwrap();
    conn.execute_batch(
        "PRAGMA temp_store = FILE;
         CREATE TEMP TABLE scratch (v INTEGER);
         INSERT INTO scratch VALUES (1), (2);",
    )
    .unwrap();
    fs.flush().await.unwrap();

    let names: Vec<String> = store
        .list_files()
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, vec!["/scratch.db".to_string()]);
}
