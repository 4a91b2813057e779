// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};

use thunder_core::BlockStore;
use thunder_storage::MemoryBlockStore;
use thunder_vfs::{BlockFileSystem, VfsOptions};
use thunder_worker::{DatabaseService, Router, ServiceSettings};

static NEXT_VFS: AtomicU64 = AtomicU64::new(0);

pub fn vfs_options() -> VfsOptions {
    VfsOptions {
        name: format!(
            "thunder-worker-test-{}-{}",
            std::process::id(),
            NEXT_VFS.fetch_add(1, Ordering::SeqCst)
        ),
        max_idle_files: 4,
    }
}

pub async fn service_on(store: Arc<dyn BlockStore>) -> Arc<DatabaseService> {
    let fs = BlockFileSystem::open(store, vfs_options()).await.unwrap();
    Arc::new(DatabaseService::new(fs, ServiceSettings::default()))
}

pub async fn router_on(store: Arc<dyn BlockStore>) -> Router {
    Router::new(service_on(store).await)
}

pub async fn router() -> Router {
    router_on(Arc::new(MemoryBlockStore::new())).await
}

/// Sends a request and unwraps its result.
pub async fn call(router: &Router, method: &str, arguments: Value) -> Value {
    router
        .handle(method, Some(arguments))
        .await
        .unwrap_or_else(|e| panic!("{method} failed: {e}"))
}

pub async fn open(router: &Router, path: &str) -> Value {
    call(router, "openDatabase", json!({ "path": path }))
        .await
        .get("id")
        .cloned()
        .expect("open returns an id")
}
