// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Thunder configuration system.

use thunder_config::diagnostic::{ConfigError, Origin};
use thunder_config::model::{StorageBackend, ThunderConfig};
use thunder_config::{load_and_validate_str, load_config, load_config_from_str};
use thunder_core::SqlLogLevel;

/// Valid TOML with all known fields deserializes successfully.
#[test]
fn valid_toml_deserializes_into_thunder_config() {
    let toml = r#"
[worker]
log_level = "debug"
sql_log_level = "verbose"

[storage]
backend = "memory"
block_store_path = "/tmp/blocks.db"
databases_path = "/data"

[vfs]
name = "thunder-test"
max_idle_files = 4
busy_timeout_ms = 250
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.worker.log_level, "debug");
    assert_eq!(config.worker.sql_log_level, SqlLogLevel::Verbose);
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.storage.block_store_path, "/tmp/blocks.db");
    assert_eq!(config.storage.databases_path, "/data");
    assert_eq!(config.vfs.name, "thunder-test");
    assert_eq!(config.vfs.max_idle_files, 4);
    assert_eq!(config.vfs.busy_timeout_ms, 250);
}

/// Sections left out of the file keep their defaults.
#[test]
fn partial_toml_keeps_defaults() {
    let config = load_config_from_str("[vfs]\nmax_idle_files = 2\n").unwrap();
    let defaults = ThunderConfig::default();
    assert_eq!(config.vfs.max_idle_files, 2);
    assert_eq!(config.vfs.name, defaults.vfs.name);
    assert_eq!(config.worker.log_level, defaults.worker.log_level);
    assert_eq!(config.storage.backend, defaults.storage.backend);
}

#[test]
fn unknown_key_gets_suggestion() {
    let toml = r#"
[vfs]
max_idle_fils = 3
"#;

    let errors = load_and_validate_str(toml).expect_err("should reject unknown field");
    let found = errors.iter().any(|e| {
        matches!(
            e,
            ConfigError::UnknownKey { key, suggestion: Some(s), .. }
                if key == "max_idle_fils" && s == "max_idle_files"
        )
    });
    assert!(found, "expected a suggestion for max_idle_fils, got {errors:?}");
}

#[test]
fn unknown_section_is_rejected() {
    let errors = load_and_validate_str("[networking]\nport = 80\n").unwrap_err();
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::UnknownKey { key, .. } if key == "networking"))
    );
}

#[test]
fn unknown_backend_lists_the_backends() {
    let errors = load_and_validate_str("[storage]\nbackend = \"indexeddb\"\n").unwrap_err();
    let found = errors.iter().any(|e| {
        matches!(
            e,
            ConfigError::InvalidValue { key, hint, .. }
                if key == "storage.backend" && hint.contains("sqlite") && hint.contains("memory")
        )
    });
    assert!(found, "got {errors:?}");
}

#[test]
fn wrong_type_points_at_the_value() {
    let toml = "[vfs]\nmax_idle_files = \"many\"\n";
    let errors = load_and_validate_str(toml).unwrap_err();
    let span = errors.iter().find_map(|e| match e {
        ConfigError::InvalidValue { key, span, .. } if key == "vfs.max_idle_files" => *span,
        _ => None,
    });
    let span = span.unwrap_or_else(|| panic!("no span in {errors:?}"));
    assert_eq!(&toml[span.offset()..span.offset() + span.len()], "\"many\"");
}

#[test]
fn misplaced_key_names_its_section() {
    let errors = load_and_validate_str("[vfs]\nlog_level = \"debug\"\n").unwrap_err();
    let found = errors.iter().any(|e| {
        matches!(
            e,
            ConfigError::UnknownKey { section: Some(section), key, hint, .. }
                if section == "vfs" && key == "log_level" && hint.contains("[worker]")
        )
    });
    assert!(found, "got {errors:?}");
}

#[test]
fn rendered_report_carries_the_hint() {
    let errors = load_and_validate_str("[vfs]\nmax_idle_fils = 3\n").unwrap_err();
    let report = thunder_config::diagnostic::render_to_string(&errors);
    assert!(report.contains("max_idle_fils"), "{report}");
    assert!(report.contains("did you mean"), "{report}");
}

#[test]
#[serial_test::serial]
fn env_typo_is_reported_by_variable_name() {
    figment::Jail::expect_with(|jail| {
        jail.set_env("THUNDER_VFS_MAX_IDLE_FILS", "3");
        let errors = thunder_config::load_and_validate().expect_err("unknown variable");
        let found = errors.iter().any(|e| {
            matches!(
                e,
                ConfigError::UnknownKey { origin: Origin::Env(var), suggestion: Some(s), .. }
                    if var == "THUNDER_VFS_MAX_IDLE_FILS" && s == "max_idle_files"
            )
        });
        assert!(found, "got {errors:?}");
        Ok(())
    });
}

#[test]
fn validation_runs_after_load() {
    let errors = load_and_validate_str("[vfs]\nmax_idle_files = 0\n").unwrap_err();
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("max_idle_files")))
    );
}

#[test]
#[serial_test::serial]
fn env_overrides_local_file() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "thunder.toml",
            r#"
[storage]
backend = "memory"

[vfs]
max_idle_files = 8
"#,
        )?;
        jail.set_env("THUNDER_VFS_MAX_IDLE_FILES", "3");
        jail.set_env("THUNDER_WORKER_SQL_LOG_LEVEL", "sql");

        let config = load_config().expect("config should load");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.vfs.max_idle_files, 3);
        assert_eq!(config.worker.sql_log_level, SqlLogLevel::Sql);
        Ok(())
    });
}
