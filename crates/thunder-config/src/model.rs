// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Thunder SQL worker.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thunder_core::SqlLogLevel;

/// Top-level Thunder configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ThunderConfig {
    /// Worker process settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Block store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Virtual file system bridge settings.
    #[serde(default)]
    pub vfs: VfsConfig,
}

/// Worker process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Initial SQL logging for new connections (none, sql, verbose).
    #[serde(default)]
    pub sql_log_level: SqlLogLevel,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            sql_log_level: SqlLogLevel::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Which block store backs the virtual files.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Deserialize, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Persistent SQLite-backed block store.
    #[default]
    Sqlite,
    /// Process memory only; nothing survives a restart.
    Memory,
}

/// Block store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Path of the SQLite file holding the `files` and `blocks` tables.
    #[serde(default = "default_block_store_path")]
    pub block_store_path: String,

    /// Value reported by `getDatabasesPath`.
    #[serde(default = "default_databases_path")]
    pub databases_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            block_store_path: default_block_store_path(),
            databases_path: default_databases_path(),
        }
    }
}

fn default_block_store_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("thunder").join("blocks.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("thunder-blocks.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_databases_path() -> String {
    "/".to_string()
}

/// VFS bridge configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VfsConfig {
    /// Name the VFS is registered under with the engine.
    #[serde(default = "default_vfs_name")]
    pub name: String,

    /// Idle file mirrors kept in memory before the least recently touched are evicted.
    #[serde(default = "default_max_idle_files")]
    pub max_idle_files: usize,

    /// How long the engine retries a busy lock before failing, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            name: default_vfs_name(),
            max_idle_files: default_max_idle_files(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_vfs_name() -> String {
    "thunder".to_string()
}

fn default_max_idle_files() -> usize {
    16
}

fn default_busy_timeout_ms() -> u64 {
    5000
}
