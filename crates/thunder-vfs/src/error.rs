// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors raised by the file-system bridge, with their SQLite result codes.

use std::os::raw::c_int;

use rusqlite::ffi;
use thiserror::Error;

use thunder_core::ThunderError;

/// A failed VFS operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VfsError {
    /// The file exists in the block store but has not been loaded, or does
    /// not exist and the open did not ask to create it.
    #[error("cannot open `{name}`")]
    CannotOpen { name: String },

    /// A read went past the end of the file; the buffer tail was zero-filled.
    #[error("short read")]
    ShortRead,

    #[error("no such file `{name}`")]
    NotFound { name: String },

    #[error("unknown file handle {0}")]
    UnknownHandle(u64),

    /// Another handle holds a conflicting lock.
    #[error("file is locked")]
    Busy,

    #[error("`{name}` is opened read-only")]
    ReadOnly { name: String },

    #[error("I/O error: {0}")]
    Io(String),
}

impl VfsError {
    /// The SQLite result code reported to the engine.
    pub fn code(&self) -> c_int {
        match self {
            VfsError::CannotOpen { .. } => ffi::SQLITE_CANTOPEN,
            VfsError::ShortRead => ffi::SQLITE_IOERR_SHORT_READ,
            VfsError::NotFound { .. } => ffi::SQLITE_IOERR_DELETE_NOENT,
            VfsError::UnknownHandle(_) => ffi::SQLITE_IOERR,
            VfsError::Busy => ffi::SQLITE_BUSY,
            VfsError::ReadOnly { .. } => ffi::SQLITE_READONLY,
            VfsError::Io(_) => ffi::SQLITE_IOERR,
        }
    }
}

impl From<VfsError> for ThunderError {
    fn from(err: VfsError) -> Self {
        ThunderError::Vfs {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_sqlite() {
        assert_eq!(VfsError::ShortRead.code(), 522);
        assert_eq!(VfsError::Busy.code(), 5);
        assert_eq!(VfsError::CannotOpen { name: "x".into() }.code(), 14);
        assert_eq!(VfsError::NotFound { name: "x".into() }.code(), 5898);
    }

    #[test]
    fn converts_into_thunder_error() {
        let err: ThunderError = VfsError::NotFound { name: "/a.db".into() }.into();
        assert_eq!(err.code(), Some(ffi::SQLITE_IOERR_DELETE_NOENT));
        assert!(err.to_string().contains("/a.db"));
    }
}
