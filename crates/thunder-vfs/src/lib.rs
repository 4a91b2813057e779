// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite VFS backed by a block store.
//!
//! The engine's file callbacks are synchronous, the block store is not. Files
//! are therefore served from in-memory mirrors: [`BlockFileSystem::preload`]
//! fills a mirror before the engine opens the file, writes land in the
//! mirror at once and are queued, and [`BlockFileSystem::flush`] replays the
//! queue against the store before the next operation starts.

pub mod error;
mod ffi;
pub mod filesystem;
pub mod lock;
mod mirror;
pub mod pending;
pub mod state;

pub use error::VfsError;
pub use filesystem::{BlockFileSystem, VfsOptions};
pub use lock::LockLevel;
pub use pending::{PendingOp, PendingWriteBuffer};
pub use state::{FileSystemCore, HandleId, OpenOptions};

/// Suffixes of the files SQLite may keep next to a database.
pub const COMPANION_SUFFIXES: [&str; 2] = ["-journal", "-wal"];

/// The absolute form of a VFS file name. Relative names are rooted at `/`.
pub fn canonical_path(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    }
}

/// Rollback journal name for a database path.
pub fn journal_path(path: &str) -> String {
    format!("{}-journal", canonical_path(path))
}

/// A database file followed by its companion files.
pub fn database_files(path: &str) -> Vec<String> {
    let base = canonical_path(path);
    std::iter::once(base.clone())
        .chain(COMPANION_SUFFIXES.iter().map(|suffix| format!("{base}{suffix}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_names_are_rooted() {
        assert_eq!(canonical_path("app.db"), "/app.db");
        assert_eq!(canonical_path("/data/app.db"), "/data/app.db");
        assert_eq!(journal_path("app.db"), "/app.db-journal");
    }

    #[test]
    fn database_files_include_companions() {
        assert_eq!(
            database_files("a.db"),
            vec!["/a.db", "/a.db-journal", "/a.db-wal"]
        );
    }
}
