// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-memory block store.
//!
//! Implements the same contract as the SQLite store without persistence. Used
//! for ephemeral databases, tests, and as the fallback when the persistent
//! store cannot be opened.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use thunder_core::traits::block_store::{block_offset, check_block};
use thunder_core::{Block, BlockStore, FileId, FileRecord, ThunderError};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    files: BTreeMap<FileId, FileRecord>,
    names: HashMap<String, FileId>,
    blocks: BTreeMap<(FileId, u64), Vec<u8>>,
}

impl MemoryState {
    fn record_mut(&mut self, id: FileId) -> Result<&mut FileRecord, ThunderError> {
        self.files.get_mut(&id).ok_or_else(|| missing(id))
    }
}

fn missing(id: FileId) -> ThunderError {
    ThunderError::Storage {
        source: format!("no file with id {id}").into(),
    }
}

/// Block store held entirely in process memory.
#[derive(Default)]
pub struct MemoryBlockStore {
    state: Mutex<MemoryState>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, ThunderError> {
        self.state
            .lock()
            .map_err(|_| ThunderError::Internal("memory block store lock poisoned".into()))
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn persistent(&self) -> bool {
        false
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>, ThunderError> {
        let state = self.state()?;
        let mut files: Vec<FileRecord> = state.files.values().cloned().collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn file(&self, name: &str) -> Result<Option<FileRecord>, ThunderError> {
        let state = self.state()?;
        Ok(state
            .names
            .get(name)
            .and_then(|id| state.files.get(id))
            .cloned())
    }

    async fn create_file(&self, name: &str) -> Result<FileRecord, ThunderError> {
        let mut state = self.state()?;
        if let Some(record) = state.names.get(name).and_then(|id| state.files.get(id)) {
            return Ok(record.clone());
        }
        state.next_id += 1;
        let record = FileRecord {
            id: FileId(state.next_id),
            name: name.to_string(),
            length: 0,
        };
        state.names.insert(name.to_string(), record.id);
        state.files.insert(record.id, record.clone());
        Ok(record)
    }

    async fn read_blocks(&self, id: FileId) -> Result<Vec<Block>, ThunderError> {
        let state = self.state()?;
        Ok(state
            .blocks
            .range((id, 0)..=(id, u64::MAX))
            .map(|(&(_, offset), data)| Block {
                offset,
                data: data.clone(),
            })
            .collect())
    }

    async fn write_block(&self, id: FileId, index: u64, bytes: &[u8]) -> Result<(), ThunderError> {
        check_block(bytes)?;
        let mut state = self.state()?;
        let offset = block_offset(index);
        let record = state.record_mut(id)?;
        record.length = record.length.max(offset + bytes.len() as u64);
        state.blocks.insert((id, offset), bytes.to_vec());
        Ok(())
    }

    async fn write_blocks(&self, id: FileId, blocks: &[(u64, Vec<u8>)]) -> Result<(), ThunderError> {
        blocks.iter().try_for_each(|(_, bytes)| check_block(bytes))?;
        let mut state = self.state()?;
        let record = state.record_mut(id)?;
        let end = blocks
            .iter()
            .map(|(index, bytes)| block_offset(*index) + bytes.len() as u64)
            .max()
            .unwrap_or(0);
        record.length = record.length.max(end);
        for (index, bytes) in blocks {
            state.blocks.insert((id, block_offset(*index)), bytes.clone());
        }
        Ok(())
    }

    async fn truncate(&self, id: FileId, length: u64) -> Result<(), ThunderError> {
        let mut state = self.state()?;
        state.record_mut(id)?.length = length;
        state
            .blocks
            .retain(|&(file, offset), _| file != id || offset < length);
        Ok(())
    }

    async fn delete(&self, id: FileId) -> Result<(), ThunderError> {
        let mut state = self.state()?;
        if let Some(record) = state.files.remove(&id) {
            state.names.remove(&record.name);
        }
        state.blocks.retain(|&(file, _), _| file != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_file_is_idempotent() {
        let store = MemoryBlockStore::new();
        let first = store.create_file("/a.db").await.unwrap();
        let second = store.create_file("/a.db").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list_files().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn write_to_unknown_file_fails() {
        let store = MemoryBlockStore::new();
        let err = store.write_block(FileId(42), 0, b"x").await.unwrap_err();
        assert!(matches!(err, ThunderError::Storage { .. }));
    }

    #[tokio::test]
    async fn oversized_block_is_rejected() {
        let store = MemoryBlockStore::new();
        let file = store.create_file("/big").await.unwrap();
        let bytes = vec![0u8; 4097];
        assert!(store.write_block(file.id, 0, &bytes).await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_name_and_blocks() {
        let store = MemoryBlockStore::new();
        let file = store.create_file("/gone").await.unwrap();
        store.write_block(file.id, 0, b"abc").await.unwrap();
        store.delete(file.id).await.unwrap();
        assert!(store.file("/gone").await.unwrap().is_none());
        assert!(store.read_blocks(file.id).await.unwrap().is_empty());
    }
}
