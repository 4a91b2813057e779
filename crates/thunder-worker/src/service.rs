// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The top-level database service.
//!
//! [`DatabaseService`] owns the block file system and the connection
//! registry. Every request the router accepts ends up in one of its methods.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use thunder_config::ThunderConfig;
use thunder_core::{
    ConnectionId, CursorId, IN_MEMORY_PATH, QueryPage, RowTable, SqlLogLevel, SqlValue,
    ThunderError,
};
use thunder_storage::open_block_store;
use thunder_vfs::{BlockFileSystem, VfsError, VfsOptions, canonical_path, database_files};

use crate::batch::{BatchEntry, BatchOperation, BatchOptions};
use crate::connection::{Database, OpenOptions};
use crate::executor::TaskId;
use crate::registry::{ConnectionRegistry, Release};

/// Service-wide settings taken from the configuration.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Directory that relative database paths resolve against.
    pub databases_path: String,
    pub busy_timeout: Duration,
    /// Default SQL log level for new connections.
    pub sql_log_level: SqlLogLevel,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            databases_path: "/".to_string(),
            busy_timeout: Duration::from_millis(5000),
            sql_log_level: SqlLogLevel::None,
        }
    }
}

impl From<&ThunderConfig> for ServiceSettings {
    fn from(config: &ThunderConfig) -> Self {
        Self {
            databases_path: config.storage.databases_path.clone(),
            busy_timeout: Duration::from_millis(config.vfs.busy_timeout_ms),
            sql_log_level: config.worker.sql_log_level,
        }
    }
}

/// Owns every open database and the file system they live on.
pub struct DatabaseService {
    fs: Arc<BlockFileSystem>,
    registry: ConnectionRegistry,
    settings: ServiceSettings,
    log_level: Mutex<SqlLogLevel>,
    open_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for DatabaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseService")
            .field("fs", &self.fs)
            .field("settings", &self.settings)
            .field("connections", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl DatabaseService {
    /// Opens the configured block store and registers the VFS.
    pub async fn start(config: &ThunderConfig) -> Result<Self, ThunderError> {
        let store = open_block_store(&config.storage).await;
        let fs = BlockFileSystem::open(
            store,
            VfsOptions {
                name: config.vfs.name.clone(),
                max_idle_files: config.vfs.max_idle_files,
            },
        )
        .await?;
        Ok(Self::new(fs, ServiceSettings::from(config)))
    }

    pub fn new(fs: Arc<BlockFileSystem>, settings: ServiceSettings) -> Self {
        let log_level = settings.sql_log_level;
        Self {
            fs,
            registry: ConnectionRegistry::new(),
            settings,
            log_level: Mutex::new(log_level),
            open_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn file_system(&self) -> &Arc<BlockFileSystem> {
        &self.fs
    }

    pub fn databases_path(&self) -> &str {
        &self.settings.databases_path
    }

    /// Resolves a request path: `:memory:` stays as is, relative paths are
    /// joined to the databases directory.
    pub fn resolve_path(&self, path: &str) -> String {
        if path == IN_MEMORY_PATH || path.starts_with('/') {
            return path.to_string();
        }
        let base = self.settings.databases_path.trim_end_matches('/');
        canonical_path(&format!("{base}/{path}"))
    }

    pub fn log_level(&self) -> SqlLogLevel {
        *self.log_level.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Sets the SQL log level for new and open connections.
    pub fn set_log_level(&self, level: SqlLogLevel) {
        *self.log_level.lock().unwrap_or_else(|p| p.into_inner()) = level;
        for db in self.registry.all() {
            db.set_log_level(level);
        }
        info!(level = %level, "sql log level changed");
    }

    /// `on` logs every statement with its arguments; off restores the
    /// configured level.
    pub fn debug_mode(&self, on: bool) {
        let level = if on {
            SqlLogLevel::Verbose
        } else {
            self.settings.sql_log_level
        };
        self.set_log_level(level);
    }

    pub fn database(&self, id: ConnectionId) -> Result<Arc<Database>, ThunderError> {
        self.registry.get(id)
    }

    pub fn open_connections(&self) -> usize {
        self.registry.len()
    }

    /// Opens a database and returns its connection id.
    ///
    /// With `single_instance` an already open connection on the same path is
    /// shared and its holder count raised. In-memory databases are never
    /// shared.
    pub async fn open(&self, path: &str, options: OpenOptions) -> Result<ConnectionId, ThunderError> {
        let path = self.resolve_path(path);
        let options = OpenOptions {
            single_instance: options.single_instance && path != IN_MEMORY_PATH,
            ..options
        };
        let _open = self.open_lock.lock().await;
        if options.single_instance
            && let Some(db) = self.registry.share(&path, options.read_only)?
        {
            debug!(connection = %db.id(), path = %path, "reusing single-instance connection");
            return Ok(db.id());
        }
        let db = Database::open(
            self.registry.next_id(),
            path,
            options,
            Some(Arc::clone(&self.fs)),
            self.settings.busy_timeout,
            self.log_level(),
        )
        .await?;
        let id = db.id();
        self.registry.insert(Arc::new(db));
        Ok(id)
    }

    /// Releases one holder of a connection; the last release closes it.
    pub async fn close(&self, id: ConnectionId) -> Result<(), ThunderError> {
        match self.registry.release(id)? {
            Release::Shared { remaining } => {
                debug!(connection = %id, remaining, "single-instance connection still held");
                Ok(())
            }
            Release::Last(db) => db.close().await,
        }
    }

    /// Closes every connection on `path` and removes the file and its
    /// journal companions.
    pub async fn delete_database(&self, path: &str) -> Result<(), ThunderError> {
        let path = self.resolve_path(path);
        if path == IN_MEMORY_PATH {
            return Ok(());
        }
        let _open = self.open_lock.lock().await;
        for db in self.registry.remove_path(&path) {
            warn!(connection = %db.id(), path = %path, "closing connection of deleted database");
            if let Err(err) = db.close().await {
                warn!(connection = %db.id(), error = %err, "close before delete failed");
            }
        }
        let mut deleted = false;
        for name in database_files(&path) {
            deleted |= self.fs.delete_file(&name).await?;
        }
        info!(path = %path, deleted, "database deleted");
        Ok(())
    }

    pub fn database_exists(&self, path: &str) -> Result<bool, ThunderError> {
        let path = self.resolve_path(path);
        if path == IN_MEMORY_PATH {
            return Ok(false);
        }
        self.fs.exists(&path)
    }

    /// The raw bytes of a database file.
    pub async fn read_database_bytes(&self, path: &str) -> Result<Vec<u8>, ThunderError> {
        let path = self.resolve_path(path);
        self.fs
            .read_file(&path)
            .await?
            .ok_or_else(|| VfsError::CannotOpen { name: path }.into())
    }

    /// Replaces a database file. Rejected while a connection has it open.
    pub async fn write_database_bytes(&self, path: &str, bytes: &[u8]) -> Result<(), ThunderError> {
        let path = self.resolve_path(path);
        if path == IN_MEMORY_PATH {
            return Err(ThunderError::Argument("cannot write an in-memory database".into()));
        }
        let _open = self.open_lock.lock().await;
        if self.registry.is_open(&path) {
            return Err(ThunderError::Argument(format!("database {path} is open")));
        }
        self.fs.write_file(&path, bytes).await?;
        info!(path = %path, bytes = bytes.len(), "database written");
        Ok(())
    }

    /// Runs `body` inside `BEGIN IMMEDIATE` / `COMMIT`, rolling back if it
    /// fails.
    ///
    /// The body's operations run inline on the connection; everyone else
    /// queues behind the whole transaction.
    pub async fn transaction<T, F, Fut>(&self, id: ConnectionId, body: F) -> Result<T, ThunderError>
    where
        F: FnOnce(TransactionScope) -> Fut,
        Fut: Future<Output = Result<T, ThunderError>>,
    {
        let db = self.registry.get(id)?;
        let guard = db.executor().acquire(None).await?;
        let task = guard.task();
        db.execute(Some(task), "BEGIN IMMEDIATE".into(), Vec::new(), None)
            .await?;
        let scope = TransactionScope {
            db: Arc::clone(&db),
            task,
        };
        let result = match body(scope).await {
            Ok(value) => match db.execute(Some(task), "COMMIT".into(), Vec::new(), None).await {
                Ok(()) => Ok(value),
                Err(err) => {
                    rollback(&db, task).await;
                    Err(err)
                }
            },
            Err(err) => {
                rollback(&db, task).await;
                Err(err)
            }
        };
        drop(guard);
        result
    }

    /// Closes every connection.
    pub async fn shutdown(&self) -> Result<(), ThunderError> {
        let databases = self.registry.drain();
        let count = databases.len();
        let mut first_error = None;
        for db in databases {
            if let Err(err) = db.close().await {
                warn!(connection = %db.id(), error = %err, "close during shutdown failed");
                first_error.get_or_insert(err);
            }
        }
        self.fs.flush().await?;
        info!(closed = count, "database service stopped");
        first_error.map_or(Ok(()), Err)
    }
}

async fn rollback(db: &Database, task: TaskId) {
    if let Err(err) = db
        .execute(Some(task), "ROLLBACK".into(), Vec::new(), None)
        .await
    {
        warn!(connection = %db.id(), error = %err, "rollback failed");
    }
}

/// Operations issued from inside [`DatabaseService::transaction`].
#[derive(Clone)]
pub struct TransactionScope {
    db: Arc<Database>,
    task: TaskId,
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("connection", &self.db.id())
            .field("task", &self.task)
            .finish()
    }
}

impl TransactionScope {
    pub fn connection(&self) -> ConnectionId {
        self.db.id()
    }

    pub async fn execute(&self, sql: &str, args: Vec<SqlValue>) -> Result<(), ThunderError> {
        self.db
            .execute(Some(self.task), sql.to_string(), args, None)
            .await
    }

    pub async fn query(&self, sql: &str, args: Vec<SqlValue>) -> Result<RowTable, ThunderError> {
        self.db.query(Some(self.task), sql.to_string(), args).await
    }

    pub async fn insert(&self, sql: &str, args: Vec<SqlValue>) -> Result<Option<i64>, ThunderError> {
        self.db.insert(Some(self.task), sql.to_string(), args).await
    }

    pub async fn update(&self, sql: &str, args: Vec<SqlValue>) -> Result<i64, ThunderError> {
        self.db
            .update(Some(self.task), sql.to_string(), args, None)
            .await
    }

    pub async fn query_cursor(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        page_size: usize,
    ) -> Result<QueryPage, ThunderError> {
        self.db
            .query_cursor(Some(self.task), sql.to_string(), args, page_size)
            .await
    }

    pub async fn next_page(&self, cursor: CursorId) -> Result<QueryPage, ThunderError> {
        self.db.next_page(Some(self.task), cursor).await
    }

    pub async fn batch(
        &self,
        operations: Vec<BatchOperation>,
        options: BatchOptions,
    ) -> Result<Option<Vec<BatchEntry>>, ThunderError> {
        self.db.batch(Some(self.task), operations, options).await
    }
}
