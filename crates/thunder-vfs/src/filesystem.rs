// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The async half of the block file system.
//!
//! [`BlockFileSystem`] owns the VFS registration and moves data between the
//! synchronous mirrors and the [`BlockStore`]: it preloads files before the
//! engine opens them and replays queued changes once an operation finishes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use thunder_core::{BlockStore, FileId, ThunderError};

use crate::canonical_path;
use crate::error::VfsError;
use crate::ffi::VfsRegistration;
use crate::pending::PendingOp;
use crate::state::{FileSystemCore, FlushStep};

/// Settings for one registered VFS.
#[derive(Debug, Clone)]
pub struct VfsOptions {
    /// Name the engine uses to select the VFS. Must be unique in the process.
    pub name: String,
    /// Unused mirrors kept in memory before the least recently touched are dropped.
    pub max_idle_files: usize,
}

/// A SQLite VFS whose files live in a [`BlockStore`].
pub struct BlockFileSystem {
    core: Arc<FileSystemCore>,
    store: Arc<dyn BlockStore>,
    flush_lock: Mutex<()>,
    _registration: VfsRegistration,
    name: String,
}

impl std::fmt::Debug for BlockFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockFileSystem")
            .field("name", &self.name)
            .field("store", &self.store.name())
            .finish_non_exhaustive()
    }
}

impl BlockFileSystem {
    /// Reads the store's file list and registers the VFS with SQLite.
    pub async fn open(
        store: Arc<dyn BlockStore>,
        options: VfsOptions,
    ) -> Result<Arc<Self>, ThunderError> {
        let core = Arc::new(FileSystemCore::new(options.max_idle_files));
        let files = store.list_files().await?;
        let count = files.len();
        core.seed_catalog(files.into_iter().map(|file| file.name))?;
        let registration = VfsRegistration::register(&options.name, Arc::clone(&core))?;
        info!(
            vfs = %options.name,
            store = store.name(),
            persistent = store.persistent(),
            files = count,
            "block file system ready"
        );
        Ok(Arc::new(Self {
            core,
            store,
            flush_lock: Mutex::new(()),
            _registration: registration,
            name: options.name,
        }))
    }

    /// The name to pass to the engine when opening a database.
    pub fn vfs_name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// The synchronous file table the engine callbacks operate on.
    pub fn core(&self) -> &FileSystemCore {
        &self.core
    }

    /// Loads a file into memory and keeps it there until [`release`](Self::release).
    ///
    /// A file that does not exist yet is pinned too, so it stays loaded once
    /// the engine creates it.
    pub async fn preload(&self, name: &str) -> Result<(), ThunderError> {
        let name = canonical_path(name);
        self.core.pin(&name)?;
        if let Err(err) = self.load(&name).await {
            self.core.unpin(&name)?;
            return Err(err);
        }
        Ok(())
    }

    /// Drops a pin taken by [`preload`](Self::preload).
    pub fn release(&self, name: &str) -> Result<(), ThunderError> {
        Ok(self.core.unpin(&canonical_path(name))?)
    }

    async fn load(&self, name: &str) -> Result<(), ThunderError> {
        if self.core.is_loaded(name)? || !self.core.exists(name)? {
            return Ok(());
        }
        let data = match self.store.file(name).await? {
            Some(record) => self.store.read_file(record.id, record.length).await?,
            None => Vec::new(),
        };
        debug!(file = name, bytes = data.len(), "preloaded");
        self.core.install(name, data)?;
        Ok(())
    }

    /// Whether a file exists, loaded or not.
    pub fn exists(&self, name: &str) -> Result<bool, ThunderError> {
        Ok(self.core.exists(&canonical_path(name))?)
    }

    /// Deletes a file and persists the deletion. Returns false if it did not exist.
    pub async fn delete_file(&self, name: &str) -> Result<bool, ThunderError> {
        let deleted = match self.core.delete(&canonical_path(name)) {
            Ok(()) => true,
            Err(VfsError::NotFound { .. }) => false,
            Err(err) => return Err(err.into()),
        };
        self.flush().await?;
        Ok(deleted)
    }

    /// A file's full contents, or `None` if it does not exist.
    pub async fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>, ThunderError> {
        let name = canonical_path(name);
        if let Some(data) = self.core.contents(&name)? {
            return Ok(Some(data));
        }
        if !self.core.exists(&name)? {
            return Ok(None);
        }
        match self.store.file(&name).await? {
            Some(record) => Ok(Some(self.store.read_file(record.id, record.length).await?)),
            None => Ok(Some(Vec::new())),
        }
    }

    /// Replaces a file's contents and persists them.
    pub async fn write_file(&self, name: &str, bytes: &[u8]) -> Result<(), ThunderError> {
        self.core.replace(&canonical_path(name), bytes)?;
        self.flush().await
    }

    /// Replays every queued change against the block store in the order it
    /// happened, then evicts idle mirrors if a close asked for it.
    ///
    /// On failure the unwritten steps are queued again ahead of newer ones.
    pub async fn flush(&self) -> Result<(), ThunderError> {
        let _guard = self.flush_lock.lock().await;
        let steps = self.core.take_flush_plan()?;
        if !steps.is_empty() {
            let count = steps.len();
            if let Err((remaining, err)) = self.replay(steps).await {
                warn!(
                    vfs = %self.name,
                    unwritten = remaining.len(),
                    error = %err,
                    "flush failed, changes requeued"
                );
                self.core.requeue(remaining)?;
                return Err(err);
            }
            debug!(vfs = %self.name, steps = count, "flushed");
        }
        for name in self.core.evict_idle()? {
            debug!(file = %name, "mirror evicted");
        }
        Ok(())
    }

    async fn replay(&self, mut steps: Vec<FlushStep>) -> Result<(), (Vec<FlushStep>, ThunderError)> {
        let mut ids: HashMap<String, FileId> = HashMap::new();
        let mut start = 0;
        while start < steps.len() {
            let end = group_end(&steps, start);
            if let Err(err) = self.apply(&steps[start..end], &mut ids).await {
                return Err((steps.split_off(start), err));
            }
            start = end;
        }
        Ok(())
    }

    async fn apply(
        &self,
        group: &[FlushStep],
        ids: &mut HashMap<String, FileId>,
    ) -> Result<(), ThunderError> {
        let Some(first) = group.first() else {
            return Ok(());
        };
        let name = first.name.as_str();
        match &first.entry.op {
            PendingOp::Create => {
                let record = self.store.create_file(name).await?;
                ids.insert(name.to_string(), record.id);
            }
            PendingOp::Delete => {
                ids.remove(name);
                if let Some(record) = self.store.file(name).await? {
                    self.store.delete(record.id).await?;
                }
            }
            PendingOp::Truncate { length } => {
                let id = self.resolve(name, ids).await?;
                self.store.truncate(id, *length).await?;
            }
            PendingOp::Write { .. } => {
                let id = self.resolve(name, ids).await?;
                let blocks: Vec<(u64, Vec<u8>)> = group
                    .iter()
                    .filter_map(|step| match &step.entry.op {
                        PendingOp::Write { index, bytes } => Some((*index, bytes.clone())),
                        _ => None,
                    })
                    .collect();
                self.store.write_blocks(id, &blocks).await?;
            }
        }
        Ok(())
    }

    async fn resolve(
        &self,
        name: &str,
        ids: &mut HashMap<String, FileId>,
    ) -> Result<FileId, ThunderError> {
        if let Some(id) = ids.get(name) {
            return Ok(*id);
        }
        let record = self.store.create_file(name).await?;
        ids.insert(name.to_string(), record.id);
        Ok(record.id)
    }
}

impl Drop for BlockFileSystem {
    fn drop(&mut self) {
        if matches!(self.core.has_pending(), Ok(true)) {
            warn!(vfs = %self.name, "dropping file system with unflushed changes");
        }
    }
}

/// Consecutive writes to one file are replayed as a single group.
fn group_end(steps: &[FlushStep], start: usize) -> usize {
    let first = &steps[start];
    if !matches!(first.entry.op, PendingOp::Write { .. }) {
        return start + 1;
    }
    steps[start + 1..]
        .iter()
        .position(|step| step.name != first.name || !matches!(step.entry.op, PendingOp::Write { .. }))
        .map_or(steps.len(), |offset| start + 1 + offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::PendingEntry;

    fn step(name: &str, seq: u64, op: PendingOp) -> FlushStep {
        FlushStep {
            name: name.to_string(),
            entry: PendingEntry { seq, op },
        }
    }

    fn write(index: u64) -> PendingOp {
        PendingOp::Write {
            index,
            bytes: vec![1],
        }
    }

    #[test]
    fn consecutive_writes_to_one_file_group_together() {
        let steps = vec![
            step("/a", 1, PendingOp::Create),
            step("/a", 2, write(0)),
            step("/a", 3, write(1)),
            step("/b", 4, write(0)),
            step("/a", 5, write(2)),
            step("/a", 6, PendingOp::Truncate { length: 1 }),
        ];
        assert_eq!(group_end(&steps, 0), 1);
        assert_eq!(group_end(&steps, 1), 3);
        assert_eq!(group_end(&steps, 3), 4);
        assert_eq!(group_end(&steps, 4), 5);
        assert_eq!(group_end(&steps, 5), 6);
    }
}
