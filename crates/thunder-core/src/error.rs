// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Thunder SQL worker.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use thiserror::Error;

use crate::types::{ConnectionId, CursorId, SqlValue};

/// The primary error type used across the block store, VFS bridge and worker.
#[derive(Debug, Error)]
pub enum ThunderError {
    /// Malformed or mistyped request arguments, raised before the engine runs.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// A request that could not be decoded at all.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request named a method the router does not know.
    #[error("unsupported method: {method}")]
    UnsupportedMethod {
        method: String,
        request: serde_json::Value,
    },

    /// The SQL engine rejected a statement.
    #[error("{message}")]
    Engine {
        code: Option<i32>,
        message: String,
        sql: Option<String>,
        arguments: Option<Vec<SqlValue>>,
    },

    /// The file-system bridge failed a callback.
    #[error("vfs error {code}: {message}")]
    Vfs { code: i32, message: String },

    /// Block store errors (backend unavailable, query failure).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("database {id} not found")]
    DatabaseNotFound { id: ConnectionId },

    /// The connection was closed while the caller waited for it.
    #[error("database {id} is closed")]
    DatabaseClosed { id: ConnectionId },

    #[error("cursor {id} not found")]
    CursorNotFound { id: CursorId },

    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ThunderError {
    /// Builds an engine error without statement context.
    pub fn engine(code: Option<i32>, message: impl Into<String>) -> Self {
        ThunderError::Engine {
            code,
            message: message.into(),
            sql: None,
            arguments: None,
        }
    }

    /// Attaches the failing statement and its arguments to an engine error.
    ///
    /// Other variants are returned unchanged.
    pub fn with_statement(self, statement: &str, args: &[SqlValue]) -> Self {
        match self {
            ThunderError::Engine {
                code,
                message,
                sql: None,
                arguments: None,
            } => ThunderError::Engine {
                code,
                message,
                sql: Some(statement.to_string()),
                arguments: Some(args.to_vec()),
            },
            other => other,
        }
    }

    /// Numeric engine result code, explicit or recovered from the message.
    pub fn code(&self) -> Option<i32> {
        match self {
            ThunderError::Engine {
                code: Some(code), ..
            } => Some(*code),
            ThunderError::Vfs { code, .. } => Some(*code),
            other => extract_code(&other.to_string()),
        }
    }
}

static CODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:sqliteexception\(|error code:?\s*|\(code\s+|code=)(\d+)")
        .unwrap_or_else(|e| panic!("invalid code pattern: {e}"))
});

/// Recovers a numeric result code embedded in an error message.
///
/// Recognizes `SqliteException(N)`, `Error code N`, `error code: N`,
/// `(code N)` and `code=N`.
pub fn extract_code(message: &str) -> Option<i32> {
    CODE_PATTERN
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Diagnostic context attached to an error response: the failing statement
/// for engine errors, the raw request for unsupported methods.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<SqlValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<serde_json::Value>,
}

/// The wire shape of a failed request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

impl From<&ThunderError> for ErrorPayload {
    fn from(err: &ThunderError) -> Self {
        let data = match err {
            ThunderError::Engine { sql, arguments, .. } if sql.is_some() || arguments.is_some() => {
                Some(ErrorData {
                    sql: sql.clone(),
                    arguments: arguments.clone(),
                    ..ErrorData::default()
                })
            }
            ThunderError::UnsupportedMethod { request, .. } => Some(ErrorData {
                request: Some(request.clone()),
                ..ErrorData::default()
            }),
            _ => None,
        };
        ErrorPayload {
            message: err.to_string(),
            code: err.code(),
            data,
        }
    }
}

impl From<ThunderError> for ErrorPayload {
    fn from(err: ThunderError) -> Self {
        ErrorPayload::from(&err)
    }
}
