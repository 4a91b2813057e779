// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Block store trait for the persistence backends behind the VFS bridge.

use async_trait::async_trait;

use crate::error::ThunderError;
use crate::types::{BLOCK_SIZE, Block, FileId, FileRecord};

/// Persists named files as fixed-size blocks.
///
/// Files are described by a [`FileRecord`] keyed by a unique name. Their
/// contents are stored as blocks keyed by `(file id, block start offset)`,
/// each at most [`BLOCK_SIZE`] bytes. Blocks may be sparse; missing ranges
/// read back as zeros up to the recorded length.
#[async_trait]
pub trait BlockStore: Send + Sync + 'static {
    /// Human-readable name of the backend, used in logs.
    fn name(&self) -> &str;

    /// Whether data survives a process restart.
    fn persistent(&self) -> bool;

    /// Every known file.
    async fn list_files(&self) -> Result<Vec<FileRecord>, ThunderError>;

    /// Looks up a file by name.
    async fn file(&self, name: &str) -> Result<Option<FileRecord>, ThunderError>;

    /// Returns the record for `name`, creating an empty file if needed.
    async fn create_file(&self, name: &str) -> Result<FileRecord, ThunderError>;

    /// All blocks of a file, ordered by offset.
    async fn read_blocks(&self, id: FileId) -> Result<Vec<Block>, ThunderError>;

    /// Replaces block `index` with `bytes`.
    ///
    /// The recorded length grows to cover the block if needed; it never shrinks here.
    async fn write_block(&self, id: FileId, index: u64, bytes: &[u8]) -> Result<(), ThunderError>;

    /// Writes several blocks in one unit. Backends override this to use a
    /// single transaction.
    async fn write_blocks(&self, id: FileId, blocks: &[(u64, Vec<u8>)]) -> Result<(), ThunderError> {
        for (index, bytes) in blocks {
            self.write_block(id, *index, bytes).await?;
        }
        Ok(())
    }

    /// Sets the file length to `length` and drops every block starting at or
    /// past it. The tail of the last kept block is left untouched.
    async fn truncate(&self, id: FileId, length: u64) -> Result<(), ThunderError>;

    /// Removes a file and all its blocks. Unknown ids are ignored.
    async fn delete(&self, id: FileId) -> Result<(), ThunderError>;

    /// Assembles a file's contents, zero-filling gaps and clipping to its length.
    async fn read_file(&self, id: FileId, length: u64) -> Result<Vec<u8>, ThunderError> {
        let mut data = vec![0u8; usize::try_from(length).map_err(|_| {
            ThunderError::Internal(format!("file length {length} exceeds address space"))
        })?];
        for block in self.read_blocks(id).await? {
            if block.offset >= length {
                continue;
            }
            let start = block.offset as usize;
            let end = (block.offset + block.data.len() as u64).min(length) as usize;
            data[start..end].copy_from_slice(&block.data[..end - start]);
        }
        Ok(data)
    }
}

/// Splits a block index into its start offset.
pub fn block_offset(index: u64) -> u64 {
    index * BLOCK_SIZE
}

/// Rejects blocks larger than [`BLOCK_SIZE`].
pub fn check_block(bytes: &[u8]) -> Result<(), ThunderError> {
    if bytes.len() as u64 > BLOCK_SIZE {
        return Err(ThunderError::Internal(format!(
            "block of {} bytes exceeds the {BLOCK_SIZE}-byte block size",
            bytes.len()
        )));
    }
    Ok(())
}
