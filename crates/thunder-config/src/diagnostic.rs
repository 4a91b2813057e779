// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns figment extraction errors into miette diagnostics.
//!
//! An unknown key is checked against the keys of its own section for a
//! "did you mean" suggestion, and against the other sections in case it was
//! put under the wrong header. Values set through `THUNDER_*` variables are
//! reported by variable name; values from a TOML file get a source span.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use std::fmt;

use figment::error::Kind;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Keys accepted in each section of `thunder.toml`.
pub const SECTIONS: &[(&str, &[&str])] = &[
    ("worker", &["log_level", "sql_log_level"]),
    ("storage", &["backend", "block_store_path", "databases_path"]),
    ("vfs", &["name", "max_idle_files", "busy_timeout_ms"]),
];

/// Source name used for TOML given as a string rather than a file.
pub const INLINE_SOURCE: &str = "<inline>";

/// Minimum Jaro-Winkler similarity for a suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Where an offending value was set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A TOML file, by path.
    File(String),
    /// An environment variable, by name.
    Env(String),
    /// Compiled defaults or an unknown provider.
    Unknown,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::File(path) => write!(f, "{path}"),
            Origin::Env(var) => write!(f, "environment variable {var}"),
            Origin::Unknown => write!(f, "defaults"),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown configuration key `{key}` in {}", section_label(section.as_deref()))]
    #[diagnostic(code(thunder::config::unknown_key), help("{hint}"))]
    UnknownKey {
        /// The section the key appeared in; `None` at the top level.
        section: Option<String>,
        key: String,
        /// Closest valid key of the same section.
        suggestion: Option<String>,
        hint: String,
        origin: Origin,
        #[label("not a Thunder setting")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("invalid value for `{key}`: {detail}")]
    #[diagnostic(code(thunder::config::invalid_value), help("{hint}"))]
    InvalidValue {
        /// Dotted key, e.g. `vfs.max_idle_files`.
        key: String,
        detail: String,
        hint: String,
        origin: Origin,
        #[label("rejected value")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value that parsed but breaks a constraint.
    #[error("validation error: {message}")]
    #[diagnostic(code(thunder::config::validation))]
    Validation { message: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(thunder::config::other))]
    Other(String),
}

fn section_label(section: Option<&str>) -> String {
    match section {
        Some(section) => format!("[{section}]"),
        None => "the top level".to_string(),
    }
}

/// The keys of `section`, or the section names for the top level.
fn keys_of(section: Option<&str>) -> Vec<&'static str> {
    match section {
        None => SECTIONS.iter().map(|(name, _)| *name).collect(),
        Some(section) => SECTIONS
            .iter()
            .find(|(name, _)| *name == section)
            .map(|(_, keys)| keys.to_vec())
            .unwrap_or_default(),
    }
}

/// The section, other than `current`, that declares `key`.
fn home_section(key: &str, current: Option<&str>) -> Option<&'static str> {
    SECTIONS
        .iter()
        .find(|(name, keys)| Some(*name) != current && keys.contains(&key))
        .map(|(name, _)| *name)
}

/// Name of the variable that sets `path`, e.g. `THUNDER_VFS_MAX_IDLE_FILES`.
pub fn env_var_name(path: &[String]) -> String {
    format!("THUNDER_{}", path.join("_").to_ascii_uppercase())
}

/// Suggests the valid key closest to `unknown`, if any is close enough.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

fn unknown_key_hint(
    section: Option<&str>,
    key: &str,
    suggestion: Option<&str>,
    origin: &Origin,
) -> String {
    let mut hint = match (home_section(key, section), suggestion) {
        (Some(home), _) => format!("`{key}` belongs in the [{home}] section"),
        (None, Some(s)) => format!("did you mean `{s}`?"),
        (None, None) => match section {
            None => format!("sections are {}", bracketed(&keys_of(None))),
            Some(_) => format!("valid keys: {}", keys_of(section).join(", ")),
        },
    };
    if let Origin::Env(var) = origin {
        hint.push_str(&format!(" (set by {var})"));
    }
    hint
}

fn bracketed(names: &[&str]) -> String {
    names
        .iter()
        .map(|name| format!("[{name}]"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn value_hint(key: &str, expected: &str, origin: &Origin) -> String {
    match origin {
        Origin::Env(var) => format!("{var} must be {expected}"),
        _ => format!("`{key}` must be {expected}"),
    }
}

/// Converts every error in a figment error into a [`ConfigError`].
///
/// `toml_sources` holds `(path, content)` for the files that were merged, so
/// file-sourced errors can point at the offending line.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    err.into_iter()
        .map(|error| convert(&error, toml_sources))
        .collect()
}

fn convert(error: &figment::Error, toml_sources: &[(String, String)]) -> ConfigError {
    let origin = origin_of(error);
    match &error.kind {
        Kind::UnknownField(field, _) => {
            // The path ends with the unknown key itself.
            let parents = match error.path.split_last() {
                Some((last, parents)) if last == field => parents,
                _ => error.path.as_slice(),
            };
            let section = parents.first().cloned();
            let suggestion = suggest_key(field, &keys_of(section.as_deref()));
            let hint = unknown_key_hint(section.as_deref(), field, suggestion.as_deref(), &origin);
            let (span, src) = file_span(&origin, toml_sources, section.as_deref(), field, false);
            ConfigError::UnknownKey {
                section,
                key: field.clone(),
                suggestion,
                hint,
                origin,
                span,
                src,
            }
        }
        Kind::InvalidType(actual, expected) | Kind::InvalidValue(actual, expected) => {
            invalid_value(error, origin, toml_sources, format!("found {actual}"), expected)
        }
        Kind::UnknownVariant(found, variants) => {
            let expected = format!("one of {}", variants.join(", "));
            invalid_value(error, origin, toml_sources, format!("unknown variant `{found}`"), &expected)
        }
        _ => ConfigError::Other(error.to_string()),
    }
}

fn invalid_value(
    error: &figment::Error,
    origin: Origin,
    toml_sources: &[(String, String)],
    detail: String,
    expected: &str,
) -> ConfigError {
    let key = error.path.join(".");
    let (section, field) = match error.path.split_last() {
        Some((field, parents)) => (parents.first().map(String::as_str), field.as_str()),
        None => (None, ""),
    };
    let (span, src) = file_span(&origin, toml_sources, section, field, true);
    ConfigError::InvalidValue {
        hint: value_hint(&key, expected, &origin),
        key,
        detail,
        origin,
        span,
        src,
    }
}

fn origin_of(error: &figment::Error) -> Origin {
    let Some(metadata) = &error.metadata else {
        return Origin::Unknown;
    };
    match &metadata.source {
        Some(figment::Source::File(path)) => Origin::File(path.display().to_string()),
        _ if metadata.name.contains("environment") => Origin::Env(env_var_name(&error.path)),
        _ => Origin::Unknown,
    }
}

fn file_span(
    origin: &Origin,
    toml_sources: &[(String, String)],
    section: Option<&str>,
    key: &str,
    value: bool,
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    let path = match origin {
        Origin::File(path) => path.as_str(),
        Origin::Unknown => INLINE_SOURCE,
        Origin::Env(_) => return (None, None),
    };
    let Some((name, content)) = toml_sources.iter().find(|(p, _)| p == path) else {
        return (None, None);
    };
    let Some(found) = locate_key(content, section, key) else {
        return (None, None);
    };
    let span = if value {
        SourceSpan::new(found.value_start.into(), found.value_len)
    } else {
        SourceSpan::new(found.key_start.into(), key.len())
    };
    (Some(span), Some(NamedSource::new(name, content.clone())))
}

/// Byte positions of one `key = value` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLocation {
    pub key_start: usize,
    pub value_start: usize,
    pub value_len: usize,
}

/// Finds `key` inside `[section]` (or before any header when `section` is
/// `None`). A top-level key may also name a section header.
pub fn locate_key(content: &str, section: Option<&str>, key: &str) -> Option<KeyLocation> {
    let mut current: Option<&str> = None;
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let text = line.trim_end_matches(['\n', '\r']);
        let trimmed = text.trim_start();
        let indent = text.len() - trimmed.len();

        if let Some(header) = trimmed.strip_prefix('[') {
            let name = header.split(']').next().unwrap_or_default().trim();
            if section.is_none() && name == key {
                let key_start = start + indent + 1 + (header.len() - header.trim_start().len());
                return Some(KeyLocation {
                    key_start,
                    value_start: key_start,
                    value_len: key.len(),
                });
            }
            current = Some(name);
            continue;
        }
        if current != section {
            continue;
        }
        let Some(rest) = trimmed.strip_prefix(key) else {
            continue;
        };
        let Some(value) = rest.trim_start().strip_prefix('=') else {
            continue;
        };
        let value_text = value.trim();
        let value_offset = text.len() - value.trim_start().len();
        return Some(KeyLocation {
            key_start: start + indent,
            value_start: start + value_offset,
            value_len: value_text.len().max(1),
        });
    }
    None
}

/// Renders diagnostics with miette's graphical handler, one after another.
pub fn render_to_string(errors: &[ConfigError]) -> String {
    use miette::GraphicalReportHandler;

    let handler = GraphicalReportHandler::new();
    let mut out = String::new();
    for error in errors {
        let diagnostic: &dyn Diagnostic = error;
        if handler.render_report(&mut out, diagnostic).is_err() {
            out.push_str(&format!("Error: {error}\n"));
        }
    }
    out
}

/// Prints diagnostics to stderr.
pub fn render_errors(errors: &[ConfigError]) {
    eprint!("{}", render_to_string(errors));
}
