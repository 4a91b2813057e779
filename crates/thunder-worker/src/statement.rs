// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prepared statements on the raw engine handle.
//!
//! Cursors keep a statement alive between requests, which a borrowed
//! `rusqlite::Statement` cannot do, so statements here own the
//! `sqlite3_stmt` directly and finalize it on drop.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr::{self, NonNull};
use std::slice;

use rusqlite::ffi;

use thunder_core::{SqlValue, ThunderError};

/// Builds an engine error from the connection's last result.
pub(crate) fn last_error(db: *mut ffi::sqlite3) -> ThunderError {
    // SAFETY: `db` is an open connection; errmsg never returns null for one.
    let (code, message) = unsafe {
        let code = ffi::sqlite3_extended_errcode(db);
        let message = CStr::from_ptr(ffi::sqlite3_errmsg(db))
            .to_string_lossy()
            .into_owned();
        (code, message)
    };
    ThunderError::engine(Some(code), message)
}

/// Converts a `rusqlite` error raised outside statement execution.
pub(crate) fn from_rusqlite(err: rusqlite::Error) -> ThunderError {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => ThunderError::engine(
            Some(failure.extended_code),
            message.unwrap_or_else(|| failure.to_string()),
        ),
        other => ThunderError::engine(None, other.to_string()),
    }
}

/// One compiled statement.
pub(crate) struct PreparedStatement {
    raw: NonNull<ffi::sqlite3_stmt>,
    db: *mut ffi::sqlite3,
    sql: String,
}

// SAFETY: a statement is only used under its connection's executor guard,
// so it is never touched by two threads at once.
unsafe impl Send for PreparedStatement {}

impl PreparedStatement {
    /// Compiles `sql`, which may hold at most one statement.
    ///
    /// Empty statements and comments around it are ignored. `None` means the
    /// text held nothing to run.
    pub fn prepare(conn: &rusqlite::Connection, sql: &str) -> Result<Option<Self>, ThunderError> {
        // SAFETY: the handle stays valid for as long as `conn` is open, and
        // statements are finalized before the connection closes.
        let db = unsafe { conn.handle() };
        let mut rest = sql;
        let mut found: Option<Self> = None;
        while !rest.trim().is_empty() {
            let (raw, consumed) = compile(db, rest)?;
            let text = rest.get(..consumed).unwrap_or(rest);
            if let Some(raw) = raw {
                let statement = PreparedStatement {
                    raw,
                    db,
                    sql: text.trim().to_string(),
                };
                if found.is_some() {
                    return Err(ThunderError::Argument(format!(
                        "unexpected trailing statement: {}",
                        statement.sql
                    )));
                }
                found = Some(statement);
            }
            if consumed == 0 {
                break;
            }
            rest = rest.get(consumed..).unwrap_or("");
        }
        Ok(found)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameter_count(&self) -> usize {
        // SAFETY: `raw` is a live statement.
        let count = unsafe { ffi::sqlite3_bind_parameter_count(self.raw.as_ptr()) };
        usize::try_from(count).unwrap_or(0)
    }

    /// Binds positional arguments. The count must match exactly.
    pub fn bind(&mut self, args: &[SqlValue]) -> Result<(), ThunderError> {
        let expected = self.parameter_count();
        if args.len() != expected {
            return Err(ThunderError::Argument(format!(
                "statement expects {expected} arguments, got {}",
                args.len()
            )));
        }
        for (position, value) in args.iter().enumerate() {
            let index = c_int::try_from(position + 1)
                .map_err(|_| ThunderError::Argument("too many arguments".into()))?;
            let rc = self.bind_value(index, value)?;
            if rc != ffi::SQLITE_OK {
                return Err(last_error(self.db));
            }
        }
        Ok(())
    }

    fn bind_value(&mut self, index: c_int, value: &SqlValue) -> Result<c_int, ThunderError> {
        let stmt = self.raw.as_ptr();
        // SAFETY: `stmt` is live; text and blob bytes are copied by the
        // engine (SQLITE_TRANSIENT) before the call returns.
        let rc = unsafe {
            match value {
                SqlValue::Null => ffi::sqlite3_bind_null(stmt, index),
                SqlValue::Integer(i) => ffi::sqlite3_bind_int64(stmt, index, *i),
                SqlValue::Real(f) => ffi::sqlite3_bind_double(stmt, index, *f),
                SqlValue::Text(text) => ffi::sqlite3_bind_text(
                    stmt,
                    index,
                    text.as_ptr() as *const c_char,
                    byte_len(text.len())?,
                    ffi::SQLITE_TRANSIENT(),
                ),
                SqlValue::Blob(bytes) if bytes.is_empty() => {
                    ffi::sqlite3_bind_zeroblob(stmt, index, 0)
                }
                SqlValue::Blob(bytes) => ffi::sqlite3_bind_blob(
                    stmt,
                    index,
                    bytes.as_ptr() as *const c_void,
                    byte_len(bytes.len())?,
                    ffi::SQLITE_TRANSIENT(),
                ),
            }
        };
        Ok(rc)
    }

    pub fn column_names(&self) -> Vec<String> {
        let stmt = self.raw.as_ptr();
        (0..self.column_count())
            .map(|i| {
                // SAFETY: `i` is below the column count of a live statement.
                let name = unsafe { ffi::sqlite3_column_name(stmt, i) };
                if name.is_null() {
                    String::new()
                } else {
                    unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
                }
            })
            .collect()
    }

    fn column_count(&self) -> c_int {
        // SAFETY: `raw` is a live statement.
        unsafe { ffi::sqlite3_column_count(self.raw.as_ptr()) }
    }

    /// Advances one row. `None` once the statement is done.
    pub fn step(&mut self) -> Result<Option<Vec<SqlValue>>, ThunderError> {
        // SAFETY: `raw` is a live statement.
        match unsafe { ffi::sqlite3_step(self.raw.as_ptr()) } {
            ffi::SQLITE_ROW => Ok(Some(self.row())),
            ffi::SQLITE_DONE => Ok(None),
            _ => Err(last_error(self.db)),
        }
    }

    /// Steps to completion, discarding rows.
    pub fn run(&mut self) -> Result<(), ThunderError> {
        while self.step()?.is_some() {}
        Ok(())
    }

    fn row(&self) -> Vec<SqlValue> {
        (0..self.column_count()).map(|i| self.column(i)).collect()
    }

    /// Decodes a column of the current row by its storage class.
    fn column(&self, i: c_int) -> SqlValue {
        let stmt = self.raw.as_ptr();
        // SAFETY: called only while the statement sits on a row. The
        // pointer is read before the byte count as the engine requires.
        unsafe {
            match ffi::sqlite3_column_type(stmt, i) {
                ffi::SQLITE_INTEGER => SqlValue::Integer(ffi::sqlite3_column_int64(stmt, i)),
                ffi::SQLITE_FLOAT => SqlValue::Real(ffi::sqlite3_column_double(stmt, i)),
                ffi::SQLITE_TEXT => {
                    let text = ffi::sqlite3_column_text(stmt, i);
                    let bytes = column_bytes(text, ffi::sqlite3_column_bytes(stmt, i));
                    SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
                }
                ffi::SQLITE_BLOB => {
                    let blob = ffi::sqlite3_column_blob(stmt, i) as *const u8;
                    let bytes = column_bytes(blob, ffi::sqlite3_column_bytes(stmt, i));
                    SqlValue::Blob(bytes.to_vec())
                }
                _ => SqlValue::Null,
            }
        }
    }
}

impl Drop for PreparedStatement {
    fn drop(&mut self) {
        // SAFETY: finalized exactly once, while the connection is still open.
        unsafe {
            ffi::sqlite3_finalize(self.raw.as_ptr());
        }
    }
}

fn compile(
    db: *mut ffi::sqlite3,
    text: &str,
) -> Result<(Option<NonNull<ffi::sqlite3_stmt>>, usize), ThunderError> {
    let start = text.as_ptr() as *const c_char;
    let mut raw = ptr::null_mut();
    let mut tail: *const c_char = ptr::null();
    // SAFETY: `start..start + len` is the UTF-8 text; `tail` points into it.
    let rc = unsafe { ffi::sqlite3_prepare_v2(db, start, byte_len(text.len())?, &mut raw, &mut tail) };
    if rc != ffi::SQLITE_OK {
        return Err(last_error(db));
    }
    let consumed = if tail.is_null() {
        text.len()
    } else {
        (tail as usize).saturating_sub(start as usize).min(text.len())
    };
    Ok((NonNull::new(raw), consumed))
}

fn byte_len(len: usize) -> Result<c_int, ThunderError> {
    c_int::try_from(len).map_err(|_| ThunderError::Argument(format!("value of {len} bytes is too large")))
}

/// # Safety
/// `ptr` must be null or valid for `len` bytes until the next step.
unsafe fn column_bytes<'a>(ptr: *const u8, len: c_int) -> &'a [u8] {
    let len = usize::try_from(len).unwrap_or(0);
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        unsafe { slice::from_raw_parts(ptr, len) }
    }
}
