// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request and response messages.
//!
//! A request is `{method, arguments}` with an optional `id` echoed in the
//! response. Methods form a closed set: anything outside [`Method`] is
//! rejected as unsupported before its arguments are looked at.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use strum::{Display, EnumIter, EnumString};

use thunder_core::{ConnectionId, CursorId, ErrorPayload, SqlLogLevel, SqlValue, ThunderError};

use crate::batch::BatchOperation;

/// Every method the router handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum Method {
    OpenDatabase,
    CloseDatabase,
    Execute,
    Query,
    QueryCursorNext,
    Insert,
    Update,
    Batch,
    GetDatabasesPath,
    DeleteDatabase,
    DatabaseExists,
    Options,
    WriteDatabaseBytes,
    ReadDatabaseBytes,
    DebugMode,
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "method",
    content = "arguments",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    OpenDatabase {
        path: String,
        #[serde(default)]
        read_only: bool,
        #[serde(default = "default_single_instance")]
        single_instance: bool,
    },
    CloseDatabase {
        id: ConnectionId,
    },
    Execute {
        id: ConnectionId,
        sql: String,
        #[serde(default)]
        arguments: Option<Vec<SqlValue>>,
        #[serde(default)]
        in_transaction: Option<bool>,
    },
    Query {
        id: ConnectionId,
        sql: String,
        #[serde(default)]
        arguments: Option<Vec<SqlValue>>,
        #[serde(default)]
        cursor_page_size: Option<usize>,
    },
    QueryCursorNext {
        id: ConnectionId,
        cursor_id: CursorId,
        #[serde(default)]
        cancel: bool,
    },
    Insert {
        id: ConnectionId,
        sql: String,
        #[serde(default)]
        arguments: Option<Vec<SqlValue>>,
    },
    Update {
        id: ConnectionId,
        sql: String,
        #[serde(default)]
        arguments: Option<Vec<SqlValue>>,
        #[serde(default)]
        in_transaction: Option<bool>,
    },
    Batch {
        id: ConnectionId,
        operations: Vec<BatchOperation>,
        #[serde(default)]
        no_result: bool,
        #[serde(default)]
        continue_on_error: bool,
    },
    GetDatabasesPath {},
    DeleteDatabase {
        path: String,
    },
    DatabaseExists {
        path: String,
    },
    Options {
        #[serde(default)]
        log_level: Option<LogLevelArg>,
    },
    WriteDatabaseBytes {
        path: String,
        bytes: BlobArg,
    },
    ReadDatabaseBytes {
        path: String,
    },
    DebugMode {
        on: bool,
    },
}

fn default_single_instance() -> bool {
    true
}

/// A log level given as its number (0, 1, 2) or its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LogLevelArg {
    Numeric(i64),
    Named(SqlLogLevel),
}

impl From<LogLevelArg> for SqlLogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Numeric(level) => SqlLogLevel::from_level(level),
            LogLevelArg::Named(level) => level,
        }
    }
}

/// Raw bytes carried as a `{"@blob": "<base64>"}` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobArg(pub Vec<u8>);

impl<'de> Deserialize<'de> for BlobArg {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match SqlValue::deserialize(deserializer)? {
            SqlValue::Blob(bytes) => Ok(BlobArg(bytes)),
            other => Err(serde::de::Error::custom(format!(
                "bytes must be a blob, got {}",
                other.type_name()
            ))),
        }
    }
}

impl Request {
    /// Decodes `arguments` for `method`.
    ///
    /// Unknown methods fail with [`ThunderError::UnsupportedMethod`] carrying
    /// the raw request; bad arguments fail with [`ThunderError::Argument`].
    pub fn parse(method: &str, arguments: Option<Value>) -> Result<Self, ThunderError> {
        let Ok(known) = method.parse::<Method>() else {
            return Err(ThunderError::UnsupportedMethod {
                method: method.to_string(),
                request: json!({ "method": method, "arguments": arguments }),
            });
        };
        let arguments = match arguments {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(object @ Value::Object(_)) => object,
            Some(other) => {
                return Err(ThunderError::InvalidRequest(format!(
                    "arguments of {method} must be an object, got {other}"
                )));
            }
        };
        serde_json::from_value(json!({ "method": known.to_string(), "arguments": arguments }))
            .map_err(|e| ThunderError::Argument(format!("{method}: {e}")))
    }

    pub fn method(&self) -> Method {
        match self {
            Request::OpenDatabase { .. } => Method::OpenDatabase,
            Request::CloseDatabase { .. } => Method::CloseDatabase,
            Request::Execute { .. } => Method::Execute,
            Request::Query { .. } => Method::Query,
            Request::QueryCursorNext { .. } => Method::QueryCursorNext,
            Request::Insert { .. } => Method::Insert,
            Request::Update { .. } => Method::Update,
            Request::Batch { .. } => Method::Batch,
            Request::GetDatabasesPath {} => Method::GetDatabasesPath,
            Request::DeleteDatabase { .. } => Method::DeleteDatabase,
            Request::DatabaseExists { .. } => Method::DatabaseExists,
            Request::Options { .. } => Method::Options,
            Request::WriteDatabaseBytes { .. } => Method::WriteDatabaseBytes,
            Request::ReadDatabaseBytes { .. } => Method::ReadDatabaseBytes,
            Request::DebugMode { .. } => Method::DebugMode,
        }
    }
}

/// One request message as it arrives.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Success value or error of a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Outcome {
    #[serde(rename = "result")]
    Result(Value),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl From<Result<Value, ThunderError>> for Outcome {
    fn from(result: Result<Value, ThunderError>) -> Self {
        match result {
            Ok(value) => Outcome::Result(value),
            Err(err) => Outcome::Error(ErrorPayload::from(&err)),
        }
    }
}

/// One response message: `{id?, result}` or `{id?, error}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    pub fn new(id: Option<Value>, result: Result<Value, ThunderError>) -> Self {
        Self {
            id,
            outcome: result.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn every_method_name_parses() {
        for method in Method::iter() {
            let name = method.to_string();
            assert_eq!(name.parse::<Method>().unwrap(), method);
        }
        assert_eq!(Method::QueryCursorNext.to_string(), "queryCursorNext");
    }

    #[test]
    fn open_defaults_to_single_instance() {
        let request = Request::parse("openDatabase", Some(json!({"path": "a.db"}))).unwrap();
        assert_eq!(
            request,
            Request::OpenDatabase {
                path: "a.db".into(),
                read_only: false,
                single_instance: true,
            }
        );
    }

    #[test]
    fn camel_case_arguments_decode() {
        let request = Request::parse(
            "query",
            Some(json!({"id": 3, "sql": "SELECT ?", "arguments": [{"@bigint": "12"}], "cursorPageSize": 2})),
        )
        .unwrap();
        assert_eq!(
            request,
            Request::Query {
                id: ConnectionId(3),
                sql: "SELECT ?".into(),
                arguments: Some(vec![SqlValue::Integer(12)]),
                cursor_page_size: Some(2),
            }
        );
        assert_eq!(request.method(), Method::Query);
    }

    #[test]
    fn missing_arguments_work_for_argument_free_methods() {
        assert_eq!(
            Request::parse("getDatabasesPath", None).unwrap(),
            Request::GetDatabasesPath {}
        );
        assert_eq!(
            Request::parse("options", Some(json!({"logLevel": 2}))).unwrap(),
            Request::Options {
                log_level: Some(LogLevelArg::Numeric(2))
            }
        );
    }

    #[test]
    fn unknown_method_keeps_the_raw_request() {
        let err = Request::parse("vacuumEverything", Some(json!({"id": 1}))).unwrap_err();
        match err {
            ThunderError::UnsupportedMethod { method, request } => {
                assert_eq!(method, "vacuumEverything");
                assert_eq!(request, json!({"method": "vacuumEverything", "arguments": {"id": 1}}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_argument_types_are_argument_errors() {
        let err = Request::parse(
            "execute",
            Some(json!({"id": 1, "sql": "SELECT ?", "arguments": [[1, 2]]})),
        )
        .unwrap_err();
        assert!(matches!(&err, ThunderError::Argument(m) if m.contains("unsupported argument type")), "{err}");

        let err = Request::parse("closeDatabase", Some(json!({}))).unwrap_err();
        assert!(matches!(err, ThunderError::Argument(_)));

        let err = Request::parse("writeDatabaseBytes", Some(json!({"path": "a", "bytes": "x"}))).unwrap_err();
        assert!(err.to_string().contains("bytes must be a blob"), "{err}");

        let err = Request::parse("execute", Some(json!([1]))).unwrap_err();
        assert!(matches!(err, ThunderError::InvalidRequest(_)));
    }

    #[test]
    fn responses_flatten_outcome_and_echo_id() {
        let ok = Response::new(Some(json!(7)), Ok(json!({"id": 1})));
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"id": 7, "result": {"id": 1}}));

        let failed = Response::new(None, Err(ThunderError::DatabaseNotFound { id: ConnectionId(9) }));
        assert!(failed.is_error());
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"error": {"message": "database 9 not found"}})
        );
    }
}
