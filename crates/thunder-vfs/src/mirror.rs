// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory image of one virtual file.
//!
//! The engine reads and writes the mirror synchronously. Every change to a
//! tracked mirror also records the affected blocks so they can be replayed
//! against the block store later.

use thunder_core::BLOCK_SIZE;

use crate::error::VfsError;
use crate::pending::PendingWriteBuffer;

#[derive(Debug)]
pub(crate) struct MirrorFile {
    pub name: String,
    pub data: Vec<u8>,
    /// Changes are replayed to the block store. False for temp files.
    pub persistent: bool,
    pub open_handles: usize,
    pub last_touch: u64,
    /// Deleted while handles were still open; dropped on last close.
    pub unlinked: bool,
    pub pending: PendingWriteBuffer,
}

impl MirrorFile {
    pub fn new(name: String, data: Vec<u8>, persistent: bool) -> Self {
        Self {
            name,
            data,
            persistent,
            open_handles: 0,
            last_touch: 0,
            unlinked: false,
            pending: PendingWriteBuffer::default(),
        }
    }

    /// Whether changes must be queued for the block store.
    pub fn tracked(&self) -> bool {
        self.persistent && !self.unlinked
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Copies `buf.len()` bytes starting at `offset`.
    ///
    /// Bytes past the end of the file are zero-filled and reported as a short read.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<(), VfsError> {
        let len = self.data.len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(len);
        let available = (len - start).min(buf.len());
        buf[..available].copy_from_slice(&self.data[start..start + available]);
        if available < buf.len() {
            buf[available..].fill(0);
            return Err(VfsError::ShortRead);
        }
        Ok(())
    }

    /// Applies a write and returns the indices of blocks whose stored
    /// contents must be replaced.
    ///
    /// When the write starts past the current end, the block holding the old
    /// end is included: the store may still hold stale bytes past the old
    /// length in that block, and they would become visible once the file grows.
    pub fn write(&mut self, bytes: &[u8], offset: u64) -> Result<Vec<u64>, VfsError> {
        let old_len = self.len();
        let start = to_index(offset)?;
        let end = start
            .checked_add(bytes.len())
            .ok_or_else(|| VfsError::Io(format!("write at {offset} overflows")))?;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(bytes);

        let tail = (offset > old_len && old_len % BLOCK_SIZE != 0).then_some(old_len / BLOCK_SIZE);
        let mut touched: Vec<u64> = tail.into_iter().collect();
        if !bytes.is_empty() {
            let first = offset / BLOCK_SIZE;
            let last = (end as u64 - 1) / BLOCK_SIZE;
            touched.extend((first..=last).filter(|i| Some(*i) != tail));
        }
        Ok(touched)
    }

    /// Resizes the file. When it grows from a partial block, returns that
    /// block's index so its zeroed tail is persisted too.
    pub fn truncate(&mut self, length: u64) -> Result<Option<u64>, VfsError> {
        let old_len = self.len();
        self.data.resize(to_index(length)?, 0);
        if length > old_len && old_len % BLOCK_SIZE != 0 {
            Ok(Some(old_len / BLOCK_SIZE))
        } else {
            Ok(None)
        }
    }

    /// Current contents of block `index`, clipped to the file length.
    pub fn block(&self, index: u64) -> Vec<u8> {
        let len = self.len();
        let start = (index * BLOCK_SIZE).min(len) as usize;
        let end = ((index + 1) * BLOCK_SIZE).min(len) as usize;
        self.data[start..end].to_vec()
    }

    /// Idle mirrors may be evicted; they are reloaded from the store on demand.
    pub fn idle(&self) -> bool {
        self.open_handles == 0 && self.pending.is_empty()
    }
}

fn to_index(value: u64) -> Result<usize, VfsError> {
    usize::try_from(value).map_err(|_| VfsError::Io(format!("offset {value} out of range")))
}
