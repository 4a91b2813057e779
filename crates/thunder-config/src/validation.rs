// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks constraints serde cannot express: non-empty paths, known log
//! levels, a usable VFS name and a non-zero idle file budget.

use crate::diagnostic::ConfigError;
use crate::model::{StorageBackend, ThunderConfig};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &ThunderConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let level = config.worker.log_level.trim().to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "worker.log_level `{}` is not one of {}",
                config.worker.log_level,
                LOG_LEVELS.join(", ")
            ),
        });
    }

    if config.storage.backend == StorageBackend::Sqlite
        && config.storage.block_store_path.trim().is_empty()
    {
        errors.push(ConfigError::Validation {
            message: "storage.block_store_path must not be empty for the sqlite backend"
                .to_string(),
        });
    }

    if config.storage.databases_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.databases_path must not be empty".to_string(),
        });
    }

    if config.vfs.name.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "vfs.name must not be empty".to_string(),
        });
    } else if config.vfs.name.contains('\0') {
        errors.push(ConfigError::Validation {
            message: "vfs.name must not contain NUL bytes".to_string(),
        });
    }

    if config.vfs.max_idle_files < 1 {
        errors.push(ConfigError::Validation {
            message: format!(
                "vfs.max_idle_files must be at least 1, got {}",
                config.vfs.max_idle_files
            ),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(errors: &[ConfigError]) -> Vec<String> {
        errors.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn default_config_validates() {
        let config = ThunderConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn unknown_log_level_fails_validation() {
        let mut config = ThunderConfig::default();
        config.worker.log_level = "loud".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(messages(&errors).iter().any(|m| m.contains("worker.log_level")));
    }

    #[test]
    fn memory_backend_ignores_block_store_path() {
        let mut config = ThunderConfig::default();
        config.storage.backend = StorageBackend::Memory;
        config.storage.block_store_path = String::new();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn all_errors_are_collected() {
        let mut config = ThunderConfig::default();
        config.storage.block_store_path = " ".to_string();
        config.vfs.name = String::new();
        config.vfs.max_idle_files = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3, "got {:?}", messages(&errors));
    }

    #[test]
    fn nul_in_vfs_name_fails_validation() {
        let mut config = ThunderConfig::default();
        config.vfs.name = "thun\0der".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(messages(&errors).iter().any(|m| m.contains("NUL")));
    }
}
