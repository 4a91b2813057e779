// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Block stores backing the Thunder VFS.
//!
//! Provides a persistent SQLite store with embedded migrations and a
//! single-writer connection via `tokio-rusqlite`, plus a process-memory store
//! with the same contract that doubles as the degraded-mode fallback.

pub mod memory;
pub mod migrations;
pub mod sqlite;

use std::sync::Arc;

use tracing::{info, warn};

use thunder_config::model::{StorageBackend, StorageConfig};
use thunder_core::BlockStore;

pub use memory::MemoryBlockStore;
pub use sqlite::SqliteBlockStore;

/// Opens the configured block store.
///
/// If the persistent store cannot be opened the worker keeps running on a
/// [`MemoryBlockStore`]; databases then live only as long as the process.
pub async fn open_block_store(config: &StorageConfig) -> Arc<dyn BlockStore> {
    match config.backend {
        StorageBackend::Memory => {
            info!("using in-memory block store");
            Arc::new(MemoryBlockStore::new())
        }
        StorageBackend::Sqlite => match SqliteBlockStore::open(&config.block_store_path).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(
                    path = %config.block_store_path,
                    error = %e,
                    "persistent block store unavailable, falling back to memory"
                );
                Arc::new(MemoryBlockStore::new())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_is_not_persistent() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            ..StorageConfig::default()
        };
        let store = open_block_store(&config).await;
        assert_eq!(store.name(), "memory");
        assert!(!store.persistent());
    }

    #[tokio::test]
    async fn unusable_path_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file.
        let config = StorageConfig {
            backend: StorageBackend::Sqlite,
            block_store_path: dir.path().display().to_string(),
            ..StorageConfig::default()
        };
        let store = open_block_store(&config).await;
        assert_eq!(store.name(), "memory");
    }
}
