// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the block store, the VFS bridge and the worker.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{Display, EnumString};

use crate::error::ThunderError;

/// Size of one persisted block of a virtual file.
pub const BLOCK_SIZE: u64 = 4096;

/// Path marker for a database that lives only in engine memory.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// JSON tag used to carry blob values.
pub const BLOB_TAG: &str = "@blob";

/// JSON tag used to carry integers that do not fit a JSON number.
pub const BIGINT_TAG: &str = "@bigint";

/// Number of blocks needed to hold `length` bytes.
pub fn block_count(length: u64) -> u64 {
    length.div_ceil(BLOCK_SIZE)
}

/// Identifier of an open database connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a paginated query cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CursorId(pub u64);

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned identifier of a persisted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub i64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata for one persisted virtual file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub name: String,
    pub length: u64,
}

/// One persisted chunk of a file, keyed by its start offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub offset: u64,
    pub data: Vec<u8>,
}

/// How much SQL activity a connection logs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SqlLogLevel {
    #[default]
    None,
    /// Every statement is logged.
    Sql,
    /// Statements, arguments and results are logged.
    Verbose,
}

impl SqlLogLevel {
    /// Maps the numeric levels used on the wire (0, 1, 2).
    pub fn from_level(level: i64) -> Self {
        match level {
            i64::MIN..=0 => SqlLogLevel::None,
            1 => SqlLogLevel::Sql,
            _ => SqlLogLevel::Verbose,
        }
    }

    pub fn logs_sql(self) -> bool {
        self != SqlLogLevel::None
    }

    pub fn is_verbose(self) -> bool {
        self == SqlLogLevel::Verbose
    }
}

/// A value bound to, or read from, the SQL engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Decodes a JSON argument into an engine value.
    ///
    /// Booleans bind as 0/1. Blobs and big integers use the tagged objects
    /// `{"@blob": "<base64>"}` and `{"@bigint": "<decimal>"}`. Anything else
    /// is an argument error.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ThunderError> {
        use serde_json::Value;

        match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(SqlValue::Integer(i))
                } else if n.is_u64() {
                    Err(ThunderError::Argument(format!(
                        "integer {n} is outside the 64-bit signed range"
                    )))
                } else {
                    n.as_f64().map(SqlValue::Real).ok_or_else(|| {
                        ThunderError::Argument(format!("unsupported number {n}"))
                    })
                }
            }
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Object(map) if map.len() == 1 => {
                if let Some(Value::String(encoded)) = map.get(BLOB_TAG) {
                    let bytes = BASE64.decode(encoded).map_err(|e| {
                        ThunderError::Argument(format!("invalid base64 blob: {e}"))
                    })?;
                    return Ok(SqlValue::Blob(bytes));
                }
                if let Some(Value::String(digits)) = map.get(BIGINT_TAG) {
                    let wide: i128 = digits.trim().parse().map_err(|_| {
                        ThunderError::Argument(format!("invalid big integer `{digits}`"))
                    })?;
                    let narrow = i64::try_from(wide).map_err(|_| {
                        ThunderError::Argument(format!(
                            "big integer {wide} is outside the 64-bit signed range"
                        ))
                    })?;
                    return Ok(SqlValue::Integer(narrow));
                }
                Err(unsupported(value))
            }
            _ => Err(unsupported(value)),
        }
    }

    /// Encodes the value for the wire.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::from(*i),
            SqlValue::Real(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Blob(bytes) => {
                serde_json::json!({ BLOB_TAG: BASE64.encode(bytes) })
            }
        }
    }

    /// Short name of the value's storage class, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Integer(_) => "integer",
            SqlValue::Real(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Blob(_) => "blob",
        }
    }

    /// Decodes a JSON array of arguments; a missing list binds nothing.
    pub fn list_from_json(value: Option<&serde_json::Value>) -> Result<Vec<Self>, ThunderError> {
        match value {
            None | Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(serde_json::Value::Array(items)) => items.iter().map(Self::from_json).collect(),
            Some(other) => Err(ThunderError::Argument(format!(
                "arguments must be a list, got {other}"
            ))),
        }
    }
}

fn unsupported(value: &serde_json::Value) -> ThunderError {
    ThunderError::Argument(format!("unsupported argument type: {value}"))
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Blob(value)
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SqlValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        SqlValue::from_json(&raw).map_err(|err| match err {
            ThunderError::Argument(message) => serde::de::Error::custom(message),
            other => serde::de::Error::custom(other),
        })
    }
}

/// An eagerly materialized query result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// One page of a cursor query. `cursor_id` is absent once the cursor is exhausted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryPage {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    #[serde(rename = "cursorId", skip_serializing_if = "Option::is_none")]
    pub cursor_id: Option<CursorId>,
}
