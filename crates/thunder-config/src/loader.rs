// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered loading of [`ThunderConfig`] with figment.
//!
//! Later layers win: compiled defaults, the system file, the user file, a
//! `thunder.toml` in the working directory, then `THUNDER_*` variables.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::diagnostic::SECTIONS;
use crate::model::ThunderConfig;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "THUNDER_";

const SYSTEM_FILE: &str = "/etc/thunder/thunder.toml";
const LOCAL_FILE: &str = "thunder.toml";

/// The TOML files consulted by [`load_config`], lowest precedence first.
/// Missing files are skipped when merged.
pub fn config_files() -> Vec<PathBuf> {
    let mut files = vec![PathBuf::from(SYSTEM_FILE)];
    if let Some(dir) = dirs::config_dir() {
        files.push(dir.join("thunder").join(LOCAL_FILE));
    }
    files.push(PathBuf::from(LOCAL_FILE));
    files
}

/// Loads the full hierarchy, see [`config_files`].
pub fn load_config() -> Result<ThunderConfig, figment::Error> {
    build_figment().extract()
}

/// Loads one TOML document over the defaults, ignoring files and environment.
pub fn load_config_from_str(toml_content: &str) -> Result<ThunderConfig, figment::Error> {
    defaults().merge(Toml::string(toml_content)).extract()
}

/// Loads an explicit file (the `--config` flag) plus environment overrides.
pub fn load_config_from_path(path: &Path) -> Result<ThunderConfig, figment::Error> {
    defaults()
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The merged figment before extraction.
pub fn build_figment() -> Figment {
    config_files()
        .into_iter()
        .fold(defaults(), |figment, file| figment.merge(Toml::file(file)))
        .merge(env_provider())
}

fn defaults() -> Figment {
    Figment::from(Serialized::defaults(ThunderConfig::default()))
}

/// Maps a prefix-stripped variable name to its lowercased dotted key.
///
/// `vfs_max_idle_files` becomes `vfs.max_idle_files`. Only a known section
/// name at the start is split off, so underscores inside keys survive.
/// Anything else is returned unchanged and surfaces as an unknown key.
pub fn env_key(name: &str) -> String {
    let name = name.to_ascii_lowercase();
    SECTIONS
        .iter()
        .find_map(|(section, _)| {
            name.strip_prefix(section)
                .and_then(|rest| rest.strip_prefix('_'))
                .map(|key| format!("{section}.{key}"))
        })
        .unwrap_or_else(|| name.clone())
}

fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX).map(|name| env_key(name.as_str()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_prefix_becomes_a_dot() {
        assert_eq!(env_key("vfs_max_idle_files"), "vfs.max_idle_files");
        assert_eq!(env_key("storage_databases_path"), "storage.databases_path");
        assert_eq!(env_key("WORKER_SQL_LOG_LEVEL"), "worker.sql_log_level");
    }

    #[test]
    fn section_name_inside_a_key_is_left_alone() {
        // Only the leading section is split.
        assert_eq!(env_key("storage_vfs_name"), "storage.vfs_name");
        assert_eq!(env_key("vfsname"), "vfsname");
        assert_eq!(env_key("networking"), "networking");
    }

    #[test]
    fn local_file_has_the_last_word() {
        let files = config_files();
        assert_eq!(files.first(), Some(&PathBuf::from(SYSTEM_FILE)));
        assert_eq!(files.last(), Some(&PathBuf::from(LOCAL_FILE)));
    }

    #[test]
    fn string_loading_ignores_the_environment() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("THUNDER_VFS_NAME", "from-env");
            let config = load_config_from_str("[vfs]\nmax_idle_files = 4\n")?;
            assert_eq!(config.vfs.max_idle_files, 4);
            assert_ne!(config.vfs.name, "from-env");
            Ok(())
        });
    }
}
