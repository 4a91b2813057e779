// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request dispatch.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use thunder_core::{SqlValue, ThunderError};

use crate::batch::BatchOptions;
use crate::connection::OpenOptions;
use crate::protocol::{Envelope, Request, Response};
use crate::service::DatabaseService;

fn to_json<T: Serialize>(value: &T) -> Result<Value, ThunderError> {
    serde_json::to_value(value).map_err(|e| ThunderError::Internal(format!("encode response: {e}")))
}

/// Stateless front door: decodes requests and hands them to the service.
#[derive(Debug, Clone)]
pub struct Router {
    service: Arc<DatabaseService>,
}

impl Router {
    pub fn new(service: Arc<DatabaseService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<DatabaseService> {
        &self.service
    }

    /// Handles one newline-delimited JSON message.
    pub async fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Envelope>(line) {
            Ok(envelope) => self.handle_envelope(envelope).await,
            Err(e) => {
                let id = serde_json::from_str::<Value>(line)
                    .ok()
                    .and_then(|raw| raw.get("id").cloned());
                Response::new(id, Err(ThunderError::InvalidRequest(e.to_string())))
            }
        }
    }

    pub async fn handle_envelope(&self, envelope: Envelope) -> Response {
        let result = self.handle(&envelope.method, envelope.arguments).await;
        if let Err(err) = &result {
            warn!(method = %envelope.method, error = %err, "request failed");
        }
        Response::new(envelope.id, result)
    }

    /// Decodes and runs one request.
    pub async fn handle(&self, method: &str, arguments: Option<Value>) -> Result<Value, ThunderError> {
        let request = Request::parse(method, arguments)?;
        self.dispatch(request).await
    }

    pub async fn dispatch(&self, request: Request) -> Result<Value, ThunderError> {
        let service = &self.service;
        debug!(method = %request.method(), "dispatch");
        match request {
            Request::OpenDatabase {
                path,
                read_only,
                single_instance,
            } => {
                let options = OpenOptions {
                    read_only,
                    single_instance,
                };
                let id = service.open(&path, options).await?;
                Ok(json!({ "id": id }))
            }
            Request::CloseDatabase { id } => {
                service.close(id).await?;
                Ok(Value::Null)
            }
            Request::Execute {
                id,
                sql,
                arguments,
                in_transaction,
            } => {
                let db = service.database(id)?;
                db.execute(None, sql, arguments.unwrap_or_default(), in_transaction)
                    .await?;
                Ok(Value::Null)
            }
            Request::Query {
                id,
                sql,
                arguments,
                cursor_page_size,
            } => {
                let db = service.database(id)?;
                let args = arguments.unwrap_or_default();
                match cursor_page_size {
                    Some(page_size) => to_json(&db.query_cursor(None, sql, args, page_size).await?),
                    None => to_json(&db.query(None, sql, args).await?),
                }
            }
            Request::QueryCursorNext {
                id,
                cursor_id,
                cancel,
            } => {
                let db = service.database(id)?;
                if cancel {
                    db.cancel_cursor(None, cursor_id).await?;
                    Ok(Value::Null)
                } else {
                    to_json(&db.next_page(None, cursor_id).await?)
                }
            }
            Request::Insert { id, sql, arguments } => {
                let db = service.database(id)?;
                let row_id = db.insert(None, sql, arguments.unwrap_or_default()).await?;
                Ok(match row_id {
                    Some(row_id) => json!({ "id": row_id }),
                    None => json!({}),
                })
            }
            Request::Update {
                id,
                sql,
                arguments,
                in_transaction,
            } => {
                let db = service.database(id)?;
                let changes = db
                    .update(None, sql, arguments.unwrap_or_default(), in_transaction)
                    .await?;
                Ok(json!(changes))
            }
            Request::Batch {
                id,
                operations,
                no_result,
                continue_on_error,
            } => {
                let db = service.database(id)?;
                let options = BatchOptions {
                    no_result,
                    continue_on_error,
                };
                to_json(&db.batch(None, operations, options).await?)
            }
            Request::GetDatabasesPath {} => Ok(json!(service.databases_path())),
            Request::DeleteDatabase { path } => {
                service.delete_database(&path).await?;
                Ok(Value::Null)
            }
            Request::DatabaseExists { path } => Ok(json!(service.database_exists(&path)?)),
            Request::Options { log_level } => {
                if let Some(level) = log_level {
                    service.set_log_level(level.into());
                }
                Ok(Value::Null)
            }
            Request::WriteDatabaseBytes { path, bytes } => {
                service.write_database_bytes(&path, &bytes.0).await?;
                Ok(Value::Null)
            }
            Request::ReadDatabaseBytes { path } => {
                let bytes = service.read_database_bytes(&path).await?;
                Ok(json!({ "bytes": SqlValue::Blob(bytes).to_json() }))
            }
            Request::DebugMode { on } => {
                service.debug_mode(on);
                Ok(Value::Null)
            }
        }
    }
}
