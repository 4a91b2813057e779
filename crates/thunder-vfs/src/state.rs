// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous file table behind the engine callbacks.
//!
//! Holds every loaded mirror, open handle and lock, and the queue of changes
//! not yet written to the block store. Nothing here awaits: the async side
//! preloads mirrors before the engine needs them and drains the queue
//! between operations.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::error::VfsError;
use crate::lock::{self, LockLevel, LockOutcome};
use crate::mirror::MirrorFile;
use crate::pending::{PendingEntry, PendingOp};

/// Identifies one engine-side open of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

/// Identity of a mirror. Lock state is shared by all handles on one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct FileKey(u64);

/// How the engine asked to open a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub create: bool,
    pub read_only: bool,
    pub delete_on_close: bool,
}

/// A pending change of a named file, ready to be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushStep {
    pub name: String,
    pub entry: PendingEntry,
}

#[derive(Debug)]
struct Handle {
    key: FileKey,
    lock: LockLevel,
    read_only: bool,
}

#[derive(Debug, Default)]
struct FsState {
    /// Live mirror for each loaded file name.
    keys: HashMap<String, FileKey>,
    mirrors: HashMap<FileKey, MirrorFile>,
    /// Names that exist, whether loaded or only in the block store.
    catalog: HashSet<String>,
    handles: HashMap<HandleId, Handle>,
    pins: HashMap<String, usize>,
    deletions: Vec<FlushStep>,
    /// Steps from a failed flush, replayed before anything newer.
    retry: Vec<FlushStep>,
    next_key: u64,
    next_handle: u64,
    next_seq: u64,
    clock: u64,
    evict_requested: bool,
}

impl FsState {
    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn handle(&self, id: HandleId) -> Result<&Handle, VfsError> {
        self.handles.get(&id).ok_or(VfsError::UnknownHandle(id.0))
    }

    fn mirror_of(&mut self, id: HandleId) -> Result<&mut MirrorFile, VfsError> {
        let key = self.handle(id)?.key;
        self.mirrors.get_mut(&key).ok_or(VfsError::UnknownHandle(id.0))
    }

    fn insert_mirror(&mut self, mirror: MirrorFile, named: bool) -> FileKey {
        self.next_key += 1;
        let key = FileKey(self.next_key);
        if named {
            self.keys.insert(mirror.name.clone(), key);
        }
        self.mirrors.insert(key, mirror);
        key
    }

    fn evictable(&self, mirror: &MirrorFile) -> bool {
        mirror.persistent
            && !mirror.unlinked
            && mirror.idle()
            && !self.pins.contains_key(&mirror.name)
            && !self.retry.iter().any(|step| step.name == mirror.name)
    }

    fn idle_count(&self) -> usize {
        self.mirrors.values().filter(|m| self.evictable(m)).count()
    }
}

/// The synchronous half of the block file system.
#[derive(Debug)]
pub struct FileSystemCore {
    state: Mutex<FsState>,
    max_idle_files: usize,
}

impl FileSystemCore {
    /// Creates an empty table keeping at most `max_idle_files` unused mirrors.
    pub fn new(max_idle_files: usize) -> Self {
        Self {
            state: Mutex::new(FsState::default()),
            max_idle_files,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, FsState>, VfsError> {
        self.state
            .lock()
            .map_err(|_| VfsError::Io("file table lock poisoned".into()))
    }

    /// Records names that already exist in the block store.
    pub fn seed_catalog(&self, names: impl IntoIterator<Item = String>) -> Result<(), VfsError> {
        self.state()?.catalog.extend(names);
        Ok(())
    }

    /// Opens a file for the engine.
    ///
    /// `None` or `delete_on_close` opens a private temp file that is never
    /// persisted. A named file must either be loaded already or be created
    /// by this open; a stored file that was not preloaded cannot be served
    /// synchronously.
    pub fn open(&self, name: Option<&str>, options: OpenOptions) -> Result<HandleId, VfsError> {
        let mut state = self.state()?;
        let touch = state.tick();

        let key = match name {
            Some(name) if !options.delete_on_close => {
                if let Some(key) = state.keys.get(name).copied() {
                    key
                } else if state.catalog.contains(name) || !options.create {
                    return Err(VfsError::CannotOpen {
                        name: name.to_string(),
                    });
                } else {
                    let seq = state.seq();
                    let mut mirror = MirrorFile::new(name.to_string(), Vec::new(), true);
                    mirror.pending.push(seq, PendingOp::Create);
                    state.catalog.insert(name.to_string());
                    debug!(file = name, "created file");
                    state.insert_mirror(mirror, true)
                }
            }
            _ => {
                let label = format!("<temp:{}>", state.next_key + 1);
                state.insert_mirror(MirrorFile::new(label, Vec::new(), false), false)
            }
        };

        if let Some(mirror) = state.mirrors.get_mut(&key) {
            mirror.open_handles += 1;
            mirror.last_touch = touch;
        }
        state.next_handle += 1;
        let id = HandleId(state.next_handle);
        state.handles.insert(
            id,
            Handle {
                key,
                lock: LockLevel::None,
                read_only: options.read_only,
            },
        );
        trace!(handle = id.0, ?name, "opened");
        Ok(id)
    }

    /// Releases a handle. Temp and unlinked mirrors go away with their last handle.
    pub fn close(&self, id: HandleId) -> Result<(), VfsError> {
        let mut state = self.state()?;
        let handle = state
            .handles
            .remove(&id)
            .ok_or(VfsError::UnknownHandle(id.0))?;
        let drop_mirror = match state.mirrors.get_mut(&handle.key) {
            Some(mirror) => {
                mirror.open_handles = mirror.open_handles.saturating_sub(1);
                mirror.open_handles == 0 && (!mirror.persistent || mirror.unlinked)
            }
            None => false,
        };
        if drop_mirror {
            state.mirrors.remove(&handle.key);
        }
        if state.idle_count() > self.max_idle_files {
            state.evict_requested = true;
        }
        trace!(handle = id.0, "closed");
        Ok(())
    }

    pub fn read(&self, id: HandleId, buf: &mut [u8], offset: u64) -> Result<(), VfsError> {
        let mut state = self.state()?;
        let touch = state.tick();
        let mirror = state.mirror_of(id)?;
        mirror.last_touch = touch;
        mirror.read(buf, offset)
    }

    pub fn write(&self, id: HandleId, bytes: &[u8], offset: u64) -> Result<(), VfsError> {
        let mut state = self.state()?;
        let touch = state.tick();
        if state.handle(id)?.read_only {
            let name = state.mirror_of(id)?.name.clone();
            return Err(VfsError::ReadOnly { name });
        }
        let touched = {
            let mirror = state.mirror_of(id)?;
            mirror.last_touch = touch;
            let touched = mirror.write(bytes, offset)?;
            if mirror.tracked() { touched } else { Vec::new() }
        };
        for index in touched {
            let seq = state.seq();
            let mirror = state.mirror_of(id)?;
            let bytes = mirror.block(index);
            mirror.pending.push(seq, PendingOp::Write { index, bytes });
        }
        Ok(())
    }

    pub fn truncate(&self, id: HandleId, length: u64) -> Result<(), VfsError> {
        let mut state = self.state()?;
        let seq = state.seq();
        let mirror = state.mirror_of(id)?;
        let grown_block = mirror.truncate(length)?;
        if !mirror.tracked() {
            return Ok(());
        }
        mirror.pending.push(seq, PendingOp::Truncate { length });
        if let Some(index) = grown_block {
            let seq = state.seq();
            let mirror = state.mirror_of(id)?;
            let bytes = mirror.block(index);
            mirror.pending.push(seq, PendingOp::Write { index, bytes });
        }
        Ok(())
    }

    pub fn size(&self, id: HandleId) -> Result<u64, VfsError> {
        Ok(self.state()?.mirror_of(id)?.len())
    }

    /// Raises the handle's lock, or answers [`VfsError::Busy`] on conflict.
    pub fn lock(&self, id: HandleId, wanted: LockLevel) -> Result<(), VfsError> {
        let mut state = self.state()?;
        let (key, held) = {
            let handle = state.handle(id)?;
            (handle.key, handle.lock)
        };
        let others: Vec<LockLevel> = state
            .handles
            .iter()
            .filter(|(other, h)| **other != id && h.key == key)
            .map(|(_, h)| h.lock)
            .collect();
        let outcome = lock::request(held, wanted, &others);
        let handle = state
            .handles
            .get_mut(&id)
            .ok_or(VfsError::UnknownHandle(id.0))?;
        match outcome {
            LockOutcome::Granted(level) => {
                handle.lock = level;
                Ok(())
            }
            LockOutcome::Busy { hold } => {
                handle.lock = hold;
                trace!(handle = id.0, ?wanted, "lock busy");
                Err(VfsError::Busy)
            }
        }
    }

    /// Lowers the handle's lock to at most `level`.
    pub fn unlock(&self, id: HandleId, level: LockLevel) -> Result<(), VfsError> {
        let mut state = self.state()?;
        let handle = state
            .handles
            .get_mut(&id)
            .ok_or(VfsError::UnknownHandle(id.0))?;
        handle.lock = handle.lock.min(level);
        Ok(())
    }

    /// Whether any handle on the same file holds RESERVED or stronger.
    pub fn check_reserved(&self, id: HandleId) -> Result<bool, VfsError> {
        let state = self.state()?;
        let key = state.handle(id)?.key;
        Ok(state
            .handles
            .values()
            .any(|h| h.key == key && h.lock >= LockLevel::Reserved))
    }

    /// Deletes a named file.
    ///
    /// Unflushed changes to it are discarded. Handles that are still open keep
    /// reading their detached mirror until they close.
    pub fn delete(&self, name: &str) -> Result<(), VfsError> {
        let mut state = self.state()?;
        let known = state.catalog.remove(name);
        let key = state.keys.remove(name);
        if !known && key.is_none() {
            return Err(VfsError::NotFound {
                name: name.to_string(),
            });
        }
        if let Some(key) = key {
            let open = match state.mirrors.get_mut(&key) {
                Some(mirror) => {
                    mirror.pending.clear();
                    mirror.unlinked = true;
                    mirror.open_handles > 0
                }
                None => false,
            };
            if !open {
                state.mirrors.remove(&key);
            }
        }
        state.retry.retain(|step| step.name != name);
        let seq = state.seq();
        state.deletions.push(FlushStep {
            name: name.to_string(),
            entry: PendingEntry {
                seq,
                op: PendingOp::Delete,
            },
        });
        debug!(file = name, "deleted file");
        Ok(())
    }

    pub fn exists(&self, name: &str) -> Result<bool, VfsError> {
        let state = self.state()?;
        Ok(state.keys.contains_key(name) || state.catalog.contains(name))
    }

    pub fn is_loaded(&self, name: &str) -> Result<bool, VfsError> {
        Ok(self.state()?.keys.contains_key(name))
    }

    /// Installs a mirror loaded from the block store, unless one is already live.
    pub fn install(&self, name: &str, data: Vec<u8>) -> Result<(), VfsError> {
        let mut state = self.state()?;
        if state.keys.contains_key(name) {
            return Ok(());
        }
        let touch = state.tick();
        let mut mirror = MirrorFile::new(name.to_string(), data, true);
        mirror.last_touch = touch;
        state.catalog.insert(name.to_string());
        state.insert_mirror(mirror, true);
        debug!(file = name, "mirror loaded");
        Ok(())
    }

    /// Keeps the mirror for `name` from being evicted.
    pub fn pin(&self, name: &str) -> Result<(), VfsError> {
        *self.state()?.pins.entry(name.to_string()).or_default() += 1;
        Ok(())
    }

    pub fn unpin(&self, name: &str) -> Result<(), VfsError> {
        let mut state = self.state()?;
        if let Some(count) = state.pins.get_mut(name) {
            *count -= 1;
            if *count == 0 {
                state.pins.remove(name);
            }
        }
        if state.idle_count() > self.max_idle_files {
            state.evict_requested = true;
        }
        Ok(())
    }

    /// Snapshot of a loaded file's contents.
    pub fn contents(&self, name: &str) -> Result<Option<Vec<u8>>, VfsError> {
        let state = self.state()?;
        Ok(state
            .keys
            .get(name)
            .and_then(|key| state.mirrors.get(key))
            .map(|mirror| mirror.data.clone()))
    }

    /// Replaces a file's contents wholesale, creating it if needed.
    pub fn replace(&self, name: &str, bytes: &[u8]) -> Result<(), VfsError> {
        let mut state = self.state()?;
        let key = match state.keys.get(name).copied() {
            Some(key) => key,
            None => {
                let mirror = MirrorFile::new(name.to_string(), Vec::new(), true);
                state.insert_mirror(mirror, true)
            }
        };
        state.catalog.insert(name.to_string());
        let touch = state.tick();

        let mut ops = vec![PendingOp::Create, PendingOp::Truncate { length: 0 }];
        {
            let mirror = state
                .mirrors
                .get_mut(&key)
                .ok_or_else(|| VfsError::Io(format!("mirror for `{name}` vanished")))?;
            mirror.data = bytes.to_vec();
            mirror.last_touch = touch;
            let blocks = thunder_core::block_count(mirror.len());
            ops.extend((0..blocks).map(|index| PendingOp::Write {
                index,
                bytes: mirror.block(index),
            }));
        }
        for op in ops {
            let seq = state.seq();
            if let Some(mirror) = state.mirrors.get_mut(&key) {
                mirror.pending.push(seq, op);
            }
        }
        Ok(())
    }

    /// Whether anything is waiting to be written to the block store.
    pub fn has_pending(&self) -> Result<bool, VfsError> {
        let state = self.state()?;
        Ok(!state.retry.is_empty()
            || !state.deletions.is_empty()
            || state.mirrors.values().any(|m| !m.pending.is_empty()))
    }

    /// Removes every queued change and returns them in the order they happened.
    pub fn take_flush_plan(&self) -> Result<Vec<FlushStep>, VfsError> {
        let mut state = self.state()?;
        let mut steps = std::mem::take(&mut state.retry);
        steps.append(&mut state.deletions);
        for mirror in state.mirrors.values_mut() {
            if mirror.pending.is_empty() {
                continue;
            }
            let name = mirror.name.clone();
            steps.extend(mirror.pending.take().into_iter().map(|entry| FlushStep {
                name: name.clone(),
                entry,
            }));
        }
        steps.sort_by_key(|step| step.entry.seq);
        Ok(steps)
    }

    /// Puts back steps that could not be written, ahead of anything newer.
    pub fn requeue(&self, steps: Vec<FlushStep>) -> Result<(), VfsError> {
        let mut state = self.state()?;
        let mut steps = steps;
        steps.append(&mut state.retry);
        steps.sort_by_key(|step| step.entry.seq);
        state.retry = steps;
        Ok(())
    }

    /// Drops the least recently touched idle mirrors beyond the configured budget.
    ///
    /// Only runs after a close or unpin asked for it. Returns the evicted names.
    pub fn evict_idle(&self) -> Result<Vec<String>, VfsError> {
        let mut state = self.state()?;
        if !std::mem::take(&mut state.evict_requested) {
            return Ok(Vec::new());
        }
        let mut idle: Vec<(u64, FileKey)> = state
            .mirrors
            .iter()
            .filter(|(_, m)| state.evictable(m))
            .map(|(key, m)| (m.last_touch, *key))
            .collect();
        if idle.len() <= self.max_idle_files {
            return Ok(Vec::new());
        }
        idle.sort();
        let excess = idle.len() - self.max_idle_files;
        let mut evicted = Vec::with_capacity(excess);
        for (_, key) in idle.into_iter().take(excess) {
            if let Some(mirror) = state.mirrors.remove(&key) {
                state.keys.remove(&mirror.name);
                evicted.push(mirror.name);
            }
        }
        debug!(count = evicted.len(), "evicted idle mirrors");
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create() -> OpenOptions {
        OpenOptions {
            create: true,
            ..OpenOptions::default()
        }
    }

    fn ops(steps: &[FlushStep]) -> Vec<(&str, &PendingOp)> {
        steps
            .iter()
            .map(|s| (s.name.as_str(), &s.entry.op))
            .collect()
    }

    #[test]
    fn stored_file_must_be_preloaded() {
        let fs = FileSystemCore::new(4);
        fs.seed_catalog(["/a.db".to_string()]).unwrap();
        let err = fs.open(Some("/a.db"), create()).unwrap_err();
        assert!(matches!(err, VfsError::CannotOpen { .. }));

        fs.install("/a.db", vec![1, 2, 3]).unwrap();
        let handle = fs.open(Some("/a.db"), create()).unwrap();
        assert_eq!(fs.size(handle).unwrap(), 3);
    }

    #[test]
    fn missing_file_without_create_cannot_open() {
        let fs = FileSystemCore::new(4);
        let err = fs.open(Some("/none.db"), OpenOptions::default()).unwrap_err();
        assert!(matches!(err, VfsError::CannotOpen { .. }));
    }

    #[test]
    fn writes_are_queued_in_order_across_files() {
        let fs = FileSystemCore::new(4);
        let db = fs.open(Some("/a.db"), create()).unwrap();
        let journal = fs.open(Some("/a.db-journal"), create()).unwrap();
        fs.write(journal, b"j", 0).unwrap();
        fs.write(db, b"d", 0).unwrap();

        let plan = fs.take_flush_plan().unwrap();
        assert_eq!(
            ops(&plan),
            vec![
                ("/a.db", &PendingOp::Create),
                ("/a.db-journal", &PendingOp::Create),
                ("/a.db-journal", &PendingOp::Write { index: 0, bytes: b"j".to_vec() }),
                ("/a.db", &PendingOp::Write { index: 0, bytes: b"d".to_vec() }),
            ]
        );
        assert!(!fs.has_pending().unwrap());
    }

    #[test]
    fn temp_files_are_never_queued() {
        let fs = FileSystemCore::new(4);
        let temp = fs.open(None, create()).unwrap();
        fs.write(temp, b"scratch", 0).unwrap();
        assert!(fs.take_flush_plan().unwrap().is_empty());
        fs.close(temp).unwrap();
    }

    #[test]
    fn deleting_unflushed_file_drops_its_writes() {
        let fs = FileSystemCore::new(4);
        let journal = fs.open(Some("/a.db-journal"), create()).unwrap();
        fs.write(journal, b"undo", 0).unwrap();
        fs.close(journal).unwrap();
        fs.delete("/a.db-journal").unwrap();

        let plan = fs.take_flush_plan().unwrap();
        assert_eq!(ops(&plan), vec![("/a.db-journal", &PendingOp::Delete)]);
        assert!(!fs.exists("/a.db-journal").unwrap());
    }

    #[test]
    fn delete_of_unknown_file_reports_noent() {
        let fs = FileSystemCore::new(4);
        assert!(matches!(fs.delete("/x"), Err(VfsError::NotFound { .. })));
    }

    #[test]
    fn conflicting_locks_are_busy() {
        let fs = FileSystemCore::new(4);
        let a = fs.open(Some("/a.db"), create()).unwrap();
        let b = fs.open(Some("/a.db"), create()).unwrap();
        fs.lock(a, LockLevel::Shared).unwrap();
        fs.lock(b, LockLevel::Shared).unwrap();
        fs.lock(a, LockLevel::Reserved).unwrap();
        assert!(fs.check_reserved(b).unwrap());
        assert_eq!(fs.lock(b, LockLevel::Reserved), Err(VfsError::Busy));
        assert_eq!(fs.lock(a, LockLevel::Exclusive), Err(VfsError::Busy));

        fs.unlock(b, LockLevel::None).unwrap();
        fs.lock(a, LockLevel::Exclusive).unwrap();
        assert_eq!(fs.lock(b, LockLevel::Shared), Err(VfsError::Busy));
    }

    #[test]
    fn read_only_handle_rejects_writes() {
        let fs = FileSystemCore::new(4);
        fs.install("/ro.db", vec![0; 8]).unwrap();
        let handle = fs
            .open(
                Some("/ro.db"),
                OpenOptions {
                    read_only: true,
                    ..OpenOptions::default()
                },
            )
            .unwrap();
        assert!(matches!(fs.write(handle, b"x", 0), Err(VfsError::ReadOnly { .. })));
    }

    #[test]
    fn idle_mirrors_beyond_budget_are_evicted_oldest_first() {
        let fs = FileSystemCore::new(1);
        for name in ["/1.db", "/2.db", "/3.db"] {
            fs.install(name, vec![0; 4]).unwrap();
            let handle = fs.open(Some(name), OpenOptions::default()).unwrap();
            fs.close(handle).unwrap();
        }
        let evicted = fs.evict_idle().unwrap();
        assert_eq!(evicted, vec!["/1.db".to_string(), "/2.db".to_string()]);
        assert!(fs.is_loaded("/3.db").unwrap());
        // Evicted files still exist and must be preloaded again.
        assert!(fs.exists("/1.db").unwrap());
    }

    #[test]
    fn pinned_and_dirty_mirrors_are_kept() {
        let fs = FileSystemCore::new(0);
        fs.install("/pinned.db", vec![]).unwrap();
        fs.pin("/pinned.db").unwrap();
        let dirty = fs.open(Some("/dirty.db"), create()).unwrap();
        fs.close(dirty).unwrap();

        assert!(fs.evict_idle().unwrap().is_empty());
        assert!(fs.is_loaded("/pinned.db").unwrap());
        assert!(fs.is_loaded("/dirty.db").unwrap());

        fs.unpin("/pinned.db").unwrap();
        assert_eq!(fs.evict_idle().unwrap(), vec!["/pinned.db".to_string()]);
    }

    #[test]
    fn requeued_steps_come_first() {
        let fs = FileSystemCore::new(4);
        let h = fs.open(Some("/a.db"), create()).unwrap();
        fs.write(h, b"1", 0).unwrap();
        let failed = fs.take_flush_plan().unwrap();
        fs.write(h, b"2", 1).unwrap();
        fs.requeue(failed.clone()).unwrap();

        let plan = fs.take_flush_plan().unwrap();
        assert_eq!(&plan[..failed.len()], failed.as_slice());
        assert_eq!(plan.len(), failed.len() + 1);
    }

    #[test]
    fn replace_queues_a_full_rewrite() {
        let fs = FileSystemCore::new(4);
        fs.replace("/import.db", &vec![5u8; 5000]).unwrap();
        let plan = fs.take_flush_plan().unwrap();
        let kinds: Vec<&PendingOp> = plan.iter().map(|s| &s.entry.op).collect();
        assert_eq!(kinds[0], &PendingOp::Create);
        assert_eq!(kinds[1], &PendingOp::Truncate { length: 0 });
        assert_eq!(kinds.len(), 4);
        assert_eq!(fs.contents("/import.db").unwrap().unwrap().len(), 5000);
    }
}
