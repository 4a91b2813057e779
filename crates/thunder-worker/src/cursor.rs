// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Paginated iteration over one statement's result rows.

use thunder_core::{SqlValue, ThunderError};

use crate::statement::PreparedStatement;

/// A statement being read a page at a time. Dropping the cursor finalizes
/// the statement.
pub(crate) struct Cursor {
    statement: PreparedStatement,
    columns: Vec<String>,
    page_size: usize,
}

/// Rows read by one [`Cursor::fetch`].
#[derive(Debug)]
pub(crate) struct Page {
    pub rows: Vec<Vec<SqlValue>>,
    pub exhausted: bool,
}

impl Cursor {
    pub fn new(statement: PreparedStatement, page_size: usize) -> Self {
        let columns = statement.column_names();
        Self {
            statement,
            columns,
            page_size,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Steps the statement up to `page_size` times.
    pub fn fetch(&mut self) -> Result<Page, ThunderError> {
        let mut rows = Vec::with_capacity(self.page_size.min(256));
        while rows.len() < self.page_size {
            match self.statement.step()? {
                Some(row) => rows.push(row),
                None => {
                    return Ok(Page {
                        rows,
                        exhausted: true,
                    });
                }
            }
        }
        Ok(Page {
            rows,
            exhausted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> rusqlite::Connection {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE n (value INTEGER);
             INSERT INTO n VALUES (1), (2), (3), (4), (5);",
        )
        .unwrap();
        conn
    }

    fn values(page: &Page) -> Vec<i64> {
        page.rows
            .iter()
            .map(|row| match row[0] {
                SqlValue::Integer(v) => v,
                ref other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn pages_until_exhausted() {
        let conn = seeded();
        let stmt = PreparedStatement::prepare(&conn, "SELECT value FROM n ORDER BY value")
            .unwrap()
            .unwrap();
        let mut cursor = Cursor::new(stmt, 2);
        assert_eq!(cursor.columns().to_vec(), vec!["value".to_string()]);

        let first = cursor.fetch().unwrap();
        assert_eq!((values(&first), first.exhausted), (vec![1, 2], false));
        let second = cursor.fetch().unwrap();
        assert_eq!((values(&second), second.exhausted), (vec![3, 4], false));
        let last = cursor.fetch().unwrap();
        assert_eq!((values(&last), last.exhausted), (vec![5], true));
    }

    #[test]
    fn exact_multiple_ends_with_empty_page() {
        let conn = seeded();
        let stmt = PreparedStatement::prepare(&conn, "SELECT value FROM n")
            .unwrap()
            .unwrap();
        let mut cursor = Cursor::new(stmt, 5);
        assert!(!cursor.fetch().unwrap().exhausted);
        let tail = cursor.fetch().unwrap();
        assert!(tail.rows.is_empty());
        assert!(tail.exhausted);
    }

    #[test]
    fn page_larger_than_result_exhausts_at_once() {
        let conn = seeded();
        let stmt = PreparedStatement::prepare(&conn, "SELECT value FROM n")
            .unwrap()
            .unwrap();
        let page = Cursor::new(stmt, 100).fetch().unwrap();
        assert_eq!(page.rows.len(), 5);
        assert!(page.exhausted);
    }
}
