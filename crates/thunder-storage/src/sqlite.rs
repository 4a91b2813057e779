// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent block store on a dedicated SQLite file.
//!
//! All statements go through `tokio-rusqlite`'s single background thread, so
//! the store has one writer and each multi-statement operation runs in its
//! own transaction.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};
use tracing::{debug, info};

use thunder_core::traits::block_store::{block_offset, check_block};
use thunder_core::{Block, BlockStore, FileId, FileRecord, ThunderError};

use crate::migrations::run_migrations;

pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> ThunderError {
    ThunderError::Storage {
        source: Box::new(e),
    }
}

fn to_sql_len(value: u64) -> Result<i64, rusqlite::Error> {
    i64::try_from(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn from_sql_len(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn read_record(row: &rusqlite::Row<'_>) -> Result<FileRecord, rusqlite::Error> {
    Ok(FileRecord {
        id: FileId(row.get(0)?),
        name: row.get(1)?,
        length: from_sql_len(row.get(2)?),
    })
}

/// Upserts one block and grows the file length to cover it.
fn put_block(
    tx: &rusqlite::Transaction<'_>,
    id: FileId,
    index: u64,
    bytes: &[u8],
) -> Result<(), rusqlite::Error> {
    let offset = to_sql_len(block_offset(index))?;
    let end = offset + to_sql_len(bytes.len() as u64)?;
    tx.execute(
        "INSERT INTO blocks (file_id, block_offset, data) VALUES (?1, ?2, ?3) \
         ON CONFLICT(file_id, block_offset) DO UPDATE SET data = excluded.data",
        params![id.0, offset, bytes],
    )?;
    let updated = tx.execute(
        "UPDATE files SET length = MAX(length, ?2) WHERE id = ?1",
        params![id.0, end],
    )?;
    if updated == 0 {
        return Err(rusqlite::Error::QueryReturnedNoRows);
    }
    Ok(())
}

/// Block store persisted in a SQLite database.
pub struct SqliteBlockStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteBlockStore {
    /// Open (or create) the store at `path` and apply migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ThunderError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ThunderError::Storage {
                source: Box::new(e),
            })?;
        }
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| ThunderError::Storage {
                source: Box::new(e),
            })?;
        let store = Self::init(conn, true).await?;
        info!(path = %path.display(), "block store opened");
        Ok(store)
    }

    /// Open a store in a private in-memory SQLite database.
    pub async fn open_in_memory() -> Result<Self, ThunderError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| ThunderError::Storage {
                source: Box::new(e),
            })?;
        Self::init(conn, false).await
    }

    async fn init(conn: tokio_rusqlite::Connection, wal: bool) -> Result<Self, ThunderError> {
        conn.call(move |conn| -> Result<(), rusqlite::Error> {
            if wal {
                let mode: String =
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
                debug!(journal_mode = %mode, "block store journal mode");
                conn.pragma_update(None, "synchronous", "NORMAL")?;
            }
            conn.pragma_update(None, "foreign_keys", "ON")?;
            run_migrations(conn)
        })
        .await
        .map_err(map_tr_err)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl BlockStore for SqliteBlockStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn persistent(&self) -> bool {
        true
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>, ThunderError> {
        self.conn
            .call(|conn| -> Result<Vec<FileRecord>, rusqlite::Error> {
                let mut stmt = conn.prepare("SELECT id, name, length FROM files ORDER BY name")?;
                let rows = stmt.query_map([], read_record)?;
                rows.collect()
            })
            .await
            .map_err(map_tr_err)
    }

    async fn file(&self, name: &str) -> Result<Option<FileRecord>, ThunderError> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<Option<FileRecord>, rusqlite::Error> {
                conn.query_row(
                    "SELECT id, name, length FROM files WHERE name = ?1",
                    params![name],
                    read_record,
                )
                .optional()
            })
            .await
            .map_err(map_tr_err)
    }

    async fn create_file(&self, name: &str) -> Result<FileRecord, ThunderError> {
        let name = name.to_string();
        let record = self
            .conn
            .call(move |conn| -> Result<FileRecord, rusqlite::Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO files (name, length) VALUES (?1, 0)",
                    params![name],
                )?;
                conn.query_row(
                    "SELECT id, name, length FROM files WHERE name = ?1",
                    params![name],
                    read_record,
                )
            })
            .await
            .map_err(map_tr_err)?;
        debug!(file = %record.name, id = %record.id, "file record ready");
        Ok(record)
    }

    async fn read_blocks(&self, id: FileId) -> Result<Vec<Block>, ThunderError> {
        self.conn
            .call(move |conn| -> Result<Vec<Block>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT block_offset, data FROM blocks WHERE file_id = ?1 ORDER BY block_offset",
                )?;
                let rows = stmt.query_map(params![id.0], |row| {
                    Ok(Block {
                        offset: from_sql_len(row.get(0)?),
                        data: row.get(1)?,
                    })
                })?;
                rows.collect()
            })
            .await
            .map_err(map_tr_err)
    }

    async fn write_block(&self, id: FileId, index: u64, bytes: &[u8]) -> Result<(), ThunderError> {
        check_block(bytes)?;
        let bytes = bytes.to_vec();
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                put_block(&tx, id, index, &bytes)?;
                tx.commit()
            })
            .await
            .map_err(map_tr_err)
    }

    async fn write_blocks(&self, id: FileId, blocks: &[(u64, Vec<u8>)]) -> Result<(), ThunderError> {
        blocks.iter().try_for_each(|(_, bytes)| check_block(bytes))?;
        let blocks = blocks.to_vec();
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                for (index, bytes) in &blocks {
                    put_block(&tx, id, *index, bytes)?;
                }
                tx.commit()
            })
            .await
            .map_err(map_tr_err)
    }

    async fn truncate(&self, id: FileId, length: u64) -> Result<(), ThunderError> {
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let length = to_sql_len(length)?;
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM blocks WHERE file_id = ?1 AND block_offset >= ?2",
                    params![id.0, length],
                )?;
                tx.execute(
                    "UPDATE files SET length = ?2 WHERE id = ?1",
                    params![id.0, length],
                )?;
                tx.commit()
            })
            .await
            .map_err(map_tr_err)
    }

    async fn delete(&self, id: FileId) -> Result<(), ThunderError> {
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM blocks WHERE file_id = ?1", params![id.0])?;
                tx.execute("DELETE FROM files WHERE id = ?1", params![id.0])?;
                tx.commit()
            })
            .await
            .map_err(map_tr_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/blocks.db");
        let store = SqliteBlockStore::open(&path).await.unwrap();
        assert!(path.exists());
        assert!(store.persistent());
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.db");

        {
            let store = SqliteBlockStore::open(&path).await.unwrap();
            let file = store.create_file("/keep.db").await.unwrap();
            store.write_block(file.id, 1, b"second block").await.unwrap();
        }

        let store = SqliteBlockStore::open(&path).await.unwrap();
        let file = store.file("/keep.db").await.unwrap().expect("file persisted");
        assert_eq!(file.length, 4096 + 12);
        let blocks = store.read_blocks(file.id).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].offset, 4096);
        assert_eq!(blocks[0].data, b"second block");
    }

    #[tokio::test]
    async fn write_to_unknown_file_fails() {
        let store = SqliteBlockStore::open_in_memory().await.unwrap();
        assert!(store.write_block(FileId(99), 0, b"x").await.is_err());
    }
}
