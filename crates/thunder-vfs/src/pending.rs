// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Not-yet-persisted changes to one file, in the order they happened.

/// One change waiting to reach the block store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOp {
    /// The file record must exist.
    Create,
    /// Block `index` now holds `bytes`.
    Write { index: u64, bytes: Vec<u8> },
    /// The file length became `length`.
    Truncate { length: u64 },
    /// The file was deleted.
    Delete,
}

/// A pending change tagged with its file-system-wide sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub seq: u64,
    pub op: PendingOp,
}

/// Ordered queue of pending changes for one file.
#[derive(Debug, Default)]
pub struct PendingWriteBuffer {
    entries: Vec<PendingEntry>,
}

impl PendingWriteBuffer {
    /// Appends a change.
    ///
    /// A write to the same block as the previous entry replaces it, but only
    /// when nothing else happened anywhere in between (`seq` directly follows).
    pub fn push(&mut self, seq: u64, op: PendingOp) {
        if let PendingOp::Write { index, bytes } = &op
            && let Some(last) = self.entries.last_mut()
            && last.seq + 1 == seq
            && let PendingOp::Write {
                index: last_index,
                bytes: last_bytes,
            } = &mut last.op
            && *last_index == *index
        {
            last_bytes.clone_from(bytes);
            last.seq = seq;
            return;
        }
        self.entries.push(PendingEntry { seq, op });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Removes and returns every entry.
    pub fn take(&mut self) -> Vec<PendingEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(index: u64, fill: u8) -> PendingOp {
        PendingOp::Write {
            index,
            bytes: vec![fill; 4],
        }
    }

    #[test]
    fn adjacent_writes_to_same_block_coalesce() {
        let mut buffer = PendingWriteBuffer::default();
        buffer.push(1, write(0, 1));
        buffer.push(2, write(0, 2));
        let entries = buffer.take();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].seq, 2);
        assert_eq!(entries[0].op, write(0, 2));
    }

    #[test]
    fn interleaved_writes_keep_their_order() {
        let mut buffer = PendingWriteBuffer::default();
        buffer.push(1, write(0, 1));
        // seq 2 went to another file.
        buffer.push(3, write(0, 2));
        buffer.push(4, write(1, 3));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn truncate_is_never_merged() {
        let mut buffer = PendingWriteBuffer::default();
        buffer.push(1, PendingOp::Truncate { length: 0 });
        buffer.push(2, PendingOp::Truncate { length: 0 });
        assert_eq!(buffer.len(), 2);
        assert!(buffer.take().len() == 2 && buffer.is_empty());
    }
}
