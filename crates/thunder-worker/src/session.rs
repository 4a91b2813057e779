// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Statement operations against one engine connection.
//!
//! Everything here is synchronous and runs on the connection's engine
//! thread. Engine failures are returned with the offending SQL and its
//! arguments attached.

use tracing::{debug, info};

use thunder_core::{ConnectionId, RowTable, SqlLogLevel, SqlValue, ThunderError};

use crate::batch::{BatchMethod, BatchOperation, OperationResult};
use crate::cursor::{Cursor, Page};
use crate::statement::PreparedStatement;

/// First page of a cursor query, plus the cursor when rows remain.
pub(crate) struct CursorStart {
    pub columns: Vec<String>,
    pub page: Page,
    pub cursor: Option<Cursor>,
}

pub(crate) struct EngineSession<'c> {
    conn: &'c rusqlite::Connection,
    connection: ConnectionId,
    log: SqlLogLevel,
}

impl<'c> EngineSession<'c> {
    pub fn new(conn: &'c rusqlite::Connection, connection: ConnectionId, log: SqlLogLevel) -> Self {
        Self {
            conn,
            connection,
            log,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Compiles and binds `sql`. `None` when the text holds no statement.
    fn statement(&self, sql: &str, args: &[SqlValue]) -> Result<Option<PreparedStatement>, ThunderError> {
        if self.log.logs_sql() {
            info!(connection = %self.connection, sql, "sql");
        }
        if self.log.is_verbose() && !args.is_empty() {
            debug!(connection = %self.connection, ?args, "sql arguments");
        }
        let Some(mut statement) = PreparedStatement::prepare(self.conn, sql)? else {
            if !args.is_empty() {
                return Err(ThunderError::Argument(format!(
                    "statement expects 0 arguments, got {}",
                    args.len()
                )));
            }
            return Ok(None);
        };
        statement.bind(args)?;
        Ok(Some(statement))
    }

    fn with_context<T>(
        &self,
        sql: &str,
        args: &[SqlValue],
        op: impl FnOnce() -> Result<T, ThunderError>,
    ) -> Result<T, ThunderError> {
        op().map_err(|err| {
            if self.log.logs_sql() {
                debug!(connection = %self.connection, error = %err, "sql failed");
            }
            err.with_statement(sql, args)
        })
    }

    /// Runs a statement to completion.
    pub fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<(), ThunderError> {
        self.with_context(sql, args, || {
            if let Some(mut statement) = self.statement(sql, args)? {
                statement.run()?;
            }
            Ok(())
        })
    }

    /// Runs a query and materializes every row.
    pub fn query(&self, sql: &str, args: &[SqlValue]) -> Result<RowTable, ThunderError> {
        let table = self.with_context(sql, args, || {
            let Some(mut statement) = self.statement(sql, args)? else {
                return Ok(RowTable::default());
            };
            let columns = statement.column_names();
            let mut rows = Vec::new();
            while let Some(row) = statement.step()? {
                rows.push(row);
            }
            Ok(RowTable { columns, rows })
        })?;
        if self.log.is_verbose() {
            debug!(connection = %self.connection, rows = table.rows.len(), "query result");
        }
        Ok(table)
    }

    /// Runs an insert. The new row id is reported only if a row changed.
    pub fn insert(&self, sql: &str, args: &[SqlValue]) -> Result<Option<i64>, ThunderError> {
        self.execute(sql, args)?;
        let id = (self.changes() > 0).then(|| self.conn.last_insert_rowid());
        if self.log.is_verbose() {
            debug!(connection = %self.connection, ?id, "inserted");
        }
        Ok(id)
    }

    /// Runs an update or delete and reports the affected row count.
    pub fn update(&self, sql: &str, args: &[SqlValue]) -> Result<i64, ThunderError> {
        self.execute(sql, args)?;
        let changes = self.changes();
        if self.log.is_verbose() {
            debug!(connection = %self.connection, changes, "updated");
        }
        Ok(changes)
    }

    fn changes(&self) -> i64 {
        i64::try_from(self.conn.changes()).unwrap_or(i64::MAX)
    }

    /// Compiles a query once and reads its first page.
    pub fn open_cursor(
        &self,
        sql: &str,
        args: &[SqlValue],
        page_size: usize,
    ) -> Result<CursorStart, ThunderError> {
        self.with_context(sql, args, || {
            let Some(statement) = self.statement(sql, args)? else {
                return Ok(CursorStart {
                    columns: Vec::new(),
                    page: Page {
                        rows: Vec::new(),
                        exhausted: true,
                    },
                    cursor: None,
                });
            };
            let mut cursor = Cursor::new(statement, page_size);
            let columns = cursor.columns().to_vec();
            let page = cursor.fetch()?;
            let cursor = (!page.exhausted).then_some(cursor);
            Ok(CursorStart {
                columns,
                page,
                cursor,
            })
        })
    }

    /// Dispatches one batch entry by its method.
    pub fn run_operation(&self, op: &BatchOperation) -> Result<OperationResult, ThunderError> {
        let args = op.arguments.as_deref().unwrap_or_default();
        match op.method {
            BatchMethod::Insert => self.insert(&op.sql, args).map(OperationResult::Inserted),
            BatchMethod::Execute => self.execute(&op.sql, args).map(|()| OperationResult::Executed),
            BatchMethod::Query => self.query(&op.sql, args).map(OperationResult::Rows),
            BatchMethod::Update => self.update(&op.sql, args).map(OperationResult::Updated),
        }
    }
}
