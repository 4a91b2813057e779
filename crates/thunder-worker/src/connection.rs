// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One open database.
//!
//! A [`Database`] owns an engine connection running on its own thread
//! (`tokio-rusqlite`), the executor that serializes work on it, and the open
//! cursors. After every operation the file system's queued writes are flushed
//! before the next operation may start.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use rusqlite::OpenFlags;
use tracing::{debug, info, warn};

use thunder_core::{
    ConnectionId, CursorId, IN_MEMORY_PATH, QueryPage, RowTable, SqlLogLevel, SqlValue,
    ThunderError,
};
use thunder_vfs::{BlockFileSystem, journal_path};

use crate::batch::{BatchEntry, BatchOperation, BatchOptions, run_batch};
use crate::cursor::Cursor;
use crate::executor::{SerialExecutor, TaskId};
use crate::session::EngineSession;
use crate::statement::from_rusqlite;

/// How a database is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read_only: bool,
    pub single_instance: bool,
}

#[derive(Default)]
struct ConnectionState {
    cursors: HashMap<CursorId, Cursor>,
    next_cursor: u64,
    transaction_depth: u32,
    log_level: SqlLogLevel,
}

pub(crate) fn map_call_err(err: tokio_rusqlite::Error<ThunderError>) -> ThunderError {
    match err {
        tokio_rusqlite::Error::Error(inner) => inner,
        other => ThunderError::Internal(format!("engine connection: {other}")),
    }
}

/// Characters that would end or split a path or parameter in a `file:` URI.
const URI_RESERVED: &AsciiSet = &CONTROLS.add(b'%').add(b'?').add(b'#').add(b'&').add(b'=');

/// Builds a `file:` URI selecting the block VFS for `path`.
fn vfs_uri(path: &str, vfs: &str) -> String {
    format!(
        "file:{}?vfs={}",
        utf8_percent_encode(path, URI_RESERVED),
        utf8_percent_encode(vfs, URI_RESERVED)
    )
}

/// An open database connection.
pub struct Database {
    id: ConnectionId,
    path: String,
    options: OpenOptions,
    // Declared before `engine`: cursors hold statements that must be
    // finalized before the engine connection goes away.
    state: Mutex<ConnectionState>,
    engine: tokio_rusqlite::Connection,
    executor: SerialExecutor,
    fs: Option<Arc<BlockFileSystem>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Opens `path` through the block file system, or in memory for `:memory:`.
    ///
    /// The database file and its journal are preloaded and stay pinned until
    /// [`close`](Self::close).
    pub async fn open(
        id: ConnectionId,
        path: String,
        options: OpenOptions,
        fs: Option<Arc<BlockFileSystem>>,
        busy_timeout: Duration,
        log_level: SqlLogLevel,
    ) -> Result<Self, ThunderError> {
        let fs = fs.filter(|_| path != IN_MEMORY_PATH);
        let mut flags = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        flags |= if options.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };

        let engine = match &fs {
            None => tokio_rusqlite::Connection::open_in_memory()
                .await
                .map_err(from_rusqlite)?,
            Some(fs) => {
                let pinned = [path.clone(), journal_path(&path)];
                for name in &pinned {
                    fs.preload(name).await?;
                }
                let opened =
                    tokio_rusqlite::Connection::open_with_flags(vfs_uri(&path, fs.vfs_name()), flags)
                        .await
                        .map_err(from_rusqlite);
                match opened {
                    Ok(engine) => engine,
                    Err(err) => {
                        for name in &pinned {
                            fs.release(name)?;
                        }
                        fs.flush().await?;
                        return Err(err);
                    }
                }
            }
        };
        engine
            .call(move |conn| conn.busy_timeout(busy_timeout).map_err(from_rusqlite))
            .await
            .map_err(map_call_err)?;

        info!(connection = %id, path = %path, read_only = options.read_only, "database opened");
        Ok(Self {
            id,
            path,
            options,
            state: Mutex::new(ConnectionState {
                log_level,
                ..ConnectionState::default()
            }),
            engine,
            executor: SerialExecutor::new(id),
            fs,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn options(&self) -> OpenOptions {
        self.options
    }

    pub fn executor(&self) -> &SerialExecutor {
        &self.executor
    }

    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn log_level(&self) -> SqlLogLevel {
        self.state().log_level
    }

    pub fn set_log_level(&self, level: SqlLogLevel) {
        self.state().log_level = level;
    }

    pub fn transaction_depth(&self) -> u32 {
        self.state().transaction_depth
    }

    pub fn open_cursors(&self) -> usize {
        self.state().cursors.len()
    }

    /// Runs `op` on the engine thread, then flushes queued file writes.
    ///
    /// Callers must hold this connection's executor guard.
    async fn call<T, F>(&self, op: F) -> Result<T, ThunderError>
    where
        F: FnOnce(&EngineSession<'_>) -> Result<T, ThunderError> + Send + 'static,
        T: Send + 'static,
    {
        let id = self.id;
        let log_level = self.log_level();
        let result = self
            .engine
            .call(move |conn| op(&EngineSession::new(conn, id, log_level)))
            .await
            .map_err(map_call_err);
        let flushed = self.flush().await;
        let value = result?;
        flushed?;
        Ok(value)
    }

    async fn flush(&self) -> Result<(), ThunderError> {
        match &self.fs {
            Some(fs) => fs.flush().await,
            None => Ok(()),
        }
    }

    fn track_transaction(&self, in_transaction: Option<bool>) {
        let mut state = self.state();
        match in_transaction {
            Some(true) => state.transaction_depth += 1,
            Some(false) => state.transaction_depth = 0,
            None => {}
        }
    }

    pub async fn execute(
        &self,
        caller: Option<TaskId>,
        sql: String,
        args: Vec<SqlValue>,
        in_transaction: Option<bool>,
    ) -> Result<(), ThunderError> {
        let _guard = self.executor.acquire(caller).await?;
        self.call(move |s| s.execute(&sql, &args)).await?;
        self.track_transaction(in_transaction);
        Ok(())
    }

    pub async fn query(
        &self,
        caller: Option<TaskId>,
        sql: String,
        args: Vec<SqlValue>,
    ) -> Result<RowTable, ThunderError> {
        let _guard = self.executor.acquire(caller).await?;
        self.call(move |s| s.query(&sql, &args)).await
    }

    pub async fn insert(
        &self,
        caller: Option<TaskId>,
        sql: String,
        args: Vec<SqlValue>,
    ) -> Result<Option<i64>, ThunderError> {
        let _guard = self.executor.acquire(caller).await?;
        self.call(move |s| s.insert(&sql, &args)).await
    }

    pub async fn update(
        &self,
        caller: Option<TaskId>,
        sql: String,
        args: Vec<SqlValue>,
        in_transaction: Option<bool>,
    ) -> Result<i64, ThunderError> {
        let _guard = self.executor.acquire(caller).await?;
        let changes = self.call(move |s| s.update(&sql, &args)).await?;
        self.track_transaction(in_transaction);
        Ok(changes)
    }

    /// Starts a paginated query and returns its first page.
    ///
    /// The page carries a cursor id only while rows remain.
    pub async fn query_cursor(
        &self,
        caller: Option<TaskId>,
        sql: String,
        args: Vec<SqlValue>,
        page_size: usize,
    ) -> Result<QueryPage, ThunderError> {
        if page_size == 0 {
            return Err(ThunderError::Argument("cursorPageSize must be at least 1".into()));
        }
        let _guard = self.executor.acquire(caller).await?;
        let start = self.call(move |s| s.open_cursor(&sql, &args, page_size)).await?;
        let cursor_id = start.cursor.map(|cursor| {
            let mut state = self.state();
            state.next_cursor += 1;
            let id = CursorId(state.next_cursor);
            state.cursors.insert(id, cursor);
            debug!(connection = %self.id, cursor = %id, "cursor opened");
            id
        });
        Ok(QueryPage {
            columns: start.columns,
            rows: start.page.rows,
            cursor_id,
        })
    }

    /// Reads the next page of an open cursor. An exhausted cursor is removed.
    pub async fn next_page(
        &self,
        caller: Option<TaskId>,
        cursor_id: CursorId,
    ) -> Result<QueryPage, ThunderError> {
        let _guard = self.executor.acquire(caller).await?;
        let mut cursor = self
            .state()
            .cursors
            .remove(&cursor_id)
            .ok_or(ThunderError::CursorNotFound { id: cursor_id })?;
        // The cursor travels to the engine thread and comes back if rows
        // remain; on error it is dropped there.
        let (cursor, columns, page) = self
            .call(move |_| {
                let page = cursor.fetch()?;
                let columns = cursor.columns().to_vec();
                Ok((cursor, columns, page))
            })
            .await?;
        let cursor_id = if page.exhausted {
            debug!(connection = %self.id, cursor = %cursor_id, "cursor exhausted");
            drop_on_engine(&self.engine, cursor).await?;
            None
        } else {
            self.state().cursors.insert(cursor_id, cursor);
            Some(cursor_id)
        };
        Ok(QueryPage {
            columns,
            rows: page.rows,
            cursor_id,
        })
    }

    /// Finalizes a cursor without reading further. Unknown ids are ignored.
    pub async fn cancel_cursor(
        &self,
        caller: Option<TaskId>,
        cursor_id: CursorId,
    ) -> Result<(), ThunderError> {
        let _guard = self.executor.acquire(caller).await?;
        let Some(cursor) = self.state().cursors.remove(&cursor_id) else {
            debug!(connection = %self.id, cursor = %cursor_id, "cancel of unknown cursor");
            return Ok(());
        };
        debug!(connection = %self.id, cursor = %cursor_id, "cursor cancelled");
        drop_on_engine(&self.engine, cursor).await
    }

    pub async fn batch(
        &self,
        caller: Option<TaskId>,
        operations: Vec<BatchOperation>,
        options: BatchOptions,
    ) -> Result<Option<Vec<BatchEntry>>, ThunderError> {
        let _guard = self.executor.acquire(caller).await?;
        debug!(connection = %self.id, operations = operations.len(), "batch");
        self.call(move |s| run_batch(s, &operations, options)).await
    }

    /// Closes the connection.
    ///
    /// Queued operations are rejected; the running one finishes first. Open
    /// cursors are finalized, the engine connection is closed, and the
    /// database's files are flushed and unpinned.
    pub async fn close(&self) -> Result<(), ThunderError> {
        let _guard = self.executor.shutdown().await?;
        let cursors: Vec<Cursor> = {
            let mut state = self.state();
            if state.transaction_depth > 0 {
                warn!(
                    connection = %self.id,
                    depth = state.transaction_depth,
                    "closing inside a transaction, changes are rolled back"
                );
            }
            state.cursors.drain().map(|(_, cursor)| cursor).collect()
        };
        if !cursors.is_empty() {
            debug!(connection = %self.id, cursors = cursors.len(), "finalizing open cursors");
        }
        drop_on_engine(&self.engine, cursors).await?;

        let closed = self
            .engine
            .clone()
            .close()
            .await
            .map_err(|e| ThunderError::Internal(format!("engine close failed: {e}")));

        if let Some(fs) = &self.fs {
            fs.flush().await?;
            fs.release(&self.path)?;
            fs.release(&journal_path(&self.path))?;
            fs.flush().await?;
        }
        closed?;
        info!(connection = %self.id, path = %self.path, "database closed");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let cursors: Vec<Cursor> = {
            let mut state = self.state();
            state.cursors.drain().map(|(_, cursor)| cursor).collect()
        };
        if cursors.is_empty() {
            return;
        }
        warn!(
            connection = %self.id,
            cursors = cursors.len(),
            "database dropped without close, finalizing open cursors"
        );
        let engine = self.engine.clone();
        let id = self.id;
        let finalize = async move {
            if let Err(err) = drop_on_engine(&engine, cursors).await {
                warn!(connection = %id, error = %err, "cursor finalization failed");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(finalize);
            }
            Err(_) => match tokio::runtime::Builder::new_current_thread().build() {
                Ok(runtime) => runtime.block_on(finalize),
                Err(err) => {
                    warn!(connection = %id, error = %err, "no runtime, finalizing cursors in place");
                    drop(finalize);
                }
            },
        }
    }
}

/// Finalizes statements on the engine thread.
async fn drop_on_engine<T: Send + 'static>(
    engine: &tokio_rusqlite::Connection,
    value: T,
) -> Result<(), ThunderError> {
    engine
        .call(move |_| {
            drop(value);
            Ok::<_, ThunderError>(())
        })
        .await
        .map_err(map_call_err)
}
