// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end protocol tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use tracing::debug;

use thunder_core::{BlockStore, SqlLogLevel, ThunderError};
use thunder_storage::{MemoryBlockStore, SqliteBlockStore};
use thunder_vfs::{BlockFileSystem, VfsOptions};
use thunder_worker::{DatabaseService, Response, Router, ServiceSettings};

static NEXT_VFS: AtomicU64 = AtomicU64::new(0);

/// Every harness registers its own VFS so parallel tests never share files.
fn unique_vfs_name() -> String {
    format!(
        "thunder-test-{}-{}",
        std::process::id(),
        NEXT_VFS.fetch_add(1, Ordering::SeqCst)
    )
}

/// Where the harness keeps its blocks.
enum Backing {
    Memory(Arc<dyn BlockStore>),
    Disk { dir: TempDir, path: PathBuf },
}

/// Builder for [`TestWorker`].
pub struct TestWorkerBuilder {
    on_disk: bool,
    max_idle_files: usize,
    settings: ServiceSettings,
}

impl TestWorkerBuilder {
    fn new() -> Self {
        Self {
            on_disk: false,
            max_idle_files: 8,
            settings: ServiceSettings::default(),
        }
    }

    /// Back the worker with a SQLite block store in a temporary directory.
    pub fn on_disk(mut self) -> Self {
        self.on_disk = true;
        self
    }

    pub fn with_max_idle_files(mut self, count: usize) -> Self {
        self.max_idle_files = count;
        self
    }

    /// Value reported by `getDatabasesPath` and used to resolve relative paths.
    pub fn with_databases_path(mut self, path: impl Into<String>) -> Self {
        self.settings.databases_path = path.into();
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.settings.busy_timeout = timeout;
        self
    }

    pub fn with_sql_log_level(mut self, level: SqlLogLevel) -> Self {
        self.settings.sql_log_level = level;
        self
    }

    pub async fn build(self) -> Result<TestWorker, ThunderError> {
        let backing = if self.on_disk {
            let dir = TempDir::new().map_err(|e| ThunderError::Storage { source: e.into() })?;
            let path = dir.path().join("blocks.db");
            Backing::Disk { dir, path }
        } else {
            Backing::Memory(Arc::new(MemoryBlockStore::new()))
        };
        TestWorker::start(backing, self.max_idle_files, self.settings).await
    }
}

/// A running worker with an isolated block store.
pub struct TestWorker {
    pub router: Router,
    pub service: Arc<DatabaseService>,
    backing: Backing,
    max_idle_files: usize,
    settings: ServiceSettings,
}

impl TestWorker {
    pub fn builder() -> TestWorkerBuilder {
        TestWorkerBuilder::new()
    }

    /// A worker over a fresh memory store with default settings.
    pub async fn in_memory() -> Result<Self, ThunderError> {
        Self::builder().build().await
    }

    async fn start(
        backing: Backing,
        max_idle_files: usize,
        settings: ServiceSettings,
    ) -> Result<Self, ThunderError> {
        let store: Arc<dyn BlockStore> = match &backing {
            Backing::Memory(store) => Arc::clone(store),
            Backing::Disk { path, .. } => Arc::new(SqliteBlockStore::open(path).await?),
        };
        let fs = BlockFileSystem::open(
            store,
            VfsOptions {
                name: unique_vfs_name(),
                max_idle_files,
            },
        )
        .await?;
        debug!(vfs = fs.vfs_name(), "test worker started");
        let service = Arc::new(DatabaseService::new(fs, settings.clone()));
        Ok(Self {
            router: Router::new(Arc::clone(&service)),
            service,
            backing,
            max_idle_files,
            settings,
        })
    }

    /// Path of the block store file, for on-disk workers.
    pub fn block_store_path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Memory(_) => None,
            Backing::Disk { path, .. } => Some(path),
        }
    }

    /// The directory holding the block store, for on-disk workers.
    pub fn temp_dir(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Memory(_) => None,
            Backing::Disk { dir, .. } => Some(dir.path()),
        }
    }

    /// Sends one request through the router.
    pub async fn call(&self, method: &str, arguments: Value) -> Result<Value, ThunderError> {
        self.router.handle(method, Some(arguments)).await
    }

    /// Sends one request and panics if it fails.
    pub async fn request(&self, method: &str, arguments: Value) -> Value {
        self.call(method, arguments)
            .await
            .unwrap_or_else(|e| panic!("{method} failed: {e}"))
    }

    /// Feeds one raw protocol line, exactly as the host would.
    pub async fn send_line(&self, line: &str) -> Response {
        self.router.handle_line(line).await
    }

    /// Opens a database and returns its connection id.
    pub async fn open(&self, path: &str) -> Value {
        self.request("openDatabase", json!({ "path": path }))
            .await
            .get("id")
            .cloned()
            .unwrap_or_else(|| panic!("openDatabase {path} returned no id"))
    }

    /// Closes every connection and starts a new worker over the same blocks.
    pub async fn restart(self) -> Result<Self, ThunderError> {
        self.service.shutdown().await?;
        let Self {
            router,
            service,
            backing,
            max_idle_files,
            settings,
        } = self;
        drop(router);
        drop(service);
        Self::start(backing, max_idle_files, settings).await
    }

    pub async fn shutdown(self) -> Result<(), ThunderError> {
        self.service.shutdown().await
    }
}
