// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Thunder SQL worker.
//!
//! This crate provides the error taxonomy, the SQL value domain and the
//! [`BlockStore`] trait shared by the storage backends, the VFS bridge and
//! the request router.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{ErrorData, ErrorPayload, ThunderError, extract_code};
pub use traits::BlockStore;
pub use types::{
    BLOCK_SIZE, Block, ConnectionId, CursorId, FileId, FileRecord, IN_MEMORY_PATH, QueryPage,
    RowTable, SqlLogLevel, SqlValue, block_count,
};
