// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordered execution of mixed operations against one connection.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::warn;

use thunder_core::{ErrorPayload, RowTable, SqlValue, ThunderError};

use crate::session::EngineSession;

/// What a batch entry does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Deserialize)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum BatchMethod {
    Insert,
    Execute,
    Query,
    Update,
}

/// One unit of work in a batch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchOperation {
    pub method: BatchMethod,
    pub sql: String,
    /// Missing and `null` both bind nothing.
    #[serde(default)]
    pub arguments: Option<Vec<SqlValue>>,
}

impl BatchOperation {
    pub fn new(method: BatchMethod, sql: impl Into<String>, arguments: Vec<SqlValue>) -> Self {
        Self {
            method,
            sql: sql.into(),
            arguments: Some(arguments),
        }
    }
}

/// How a batch reacts to failures and what it reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Skip collecting per-operation results.
    pub no_result: bool,
    /// Record a failure and move on instead of aborting the batch.
    pub continue_on_error: bool,
}

/// The result of one successful operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OperationResult {
    Inserted(Option<i64>),
    Updated(i64),
    Rows(RowTable),
    Executed,
}

/// One slot of a batch's result list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BatchEntry {
    #[serde(rename = "result")]
    Success(OperationResult),
    #[serde(rename = "error")]
    Failure(ErrorPayload),
}

/// Runs `operations` in order.
///
/// Returns `None` when results were not requested.
pub(crate) fn run_batch(
    session: &EngineSession<'_>,
    operations: &[BatchOperation],
    options: BatchOptions,
) -> Result<Option<Vec<BatchEntry>>, ThunderError> {
    let mut entries = Vec::with_capacity(if options.no_result { 0 } else { operations.len() });
    for (index, op) in operations.iter().enumerate() {
        match session.run_operation(op) {
            Ok(result) => {
                if !options.no_result {
                    entries.push(BatchEntry::Success(result));
                }
            }
            Err(err) if options.continue_on_error => {
                warn!(
                    connection = %session.connection(),
                    index,
                    method = %op.method,
                    error = %err,
                    "batch operation failed, continuing"
                );
                if !options.no_result {
                    entries.push(BatchEntry::Failure(ErrorPayload::from(&err)));
                }
            }
            Err(err) => return Err(err),
        }
    }
    Ok((!options.no_result).then_some(entries))
}
