//! Bounded paging over a single table.
//!
//! Tables with an integer key are read with a key cursor (`WHERE k > last
//! ORDER BY k`), which neither skips nor repeats rows while the key is unique.
//! Everything else falls back to OFFSET/LIMIT against the row count taken
//! before the first page. Offset paging is not safe under concurrent writes:
//! rows inserted or deleted between pages shift the window and may be skipped
//! or read twice. Offset pages also carry no ORDER BY, so even an idle table
//! is only read consistently if the engine returns rows in the same order on
//! every query. PostgreSQL's synchronized sequential scans break that on large
//! tables: a page may start scanning wherever a concurrent scan already is.

use super::{ColumnInfo, Page, PageRequest, TableSource};
use crate::error::{BackupError, Result};

pub const DEFAULT_FETCH_BATCH_SIZE: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Cursor { column: String },
    Offset,
}

impl Strategy {
    /// Integer primary key, then integer auto-increment column, then offset.
    pub fn select(columns: &[ColumnInfo]) -> Strategy {
        columns
            .iter()
            .find(|c| c.integer && c.primary_key)
            .or_else(|| columns.iter().find(|c| c.integer && c.auto_increment))
            .map(|c| Strategy::Cursor {
                column: c.name.clone(),
            })
            .unwrap_or(Strategy::Offset)
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Strategy::Cursor { column } => Some(column),
            Strategy::Offset => None,
        }
    }
}

/// Position reached inside a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportCursor {
    After(Option<i64>),
    Offset(u64),
}

pub struct Paginator {
    table: String,
    columns: Vec<ColumnInfo>,
    strategy: Strategy,
    cursor: ExportCursor,
    fetch_size: u64,
    row_count: u64,
    fetched: u64,
    fetches: usize,
    done: bool,
}

impl Paginator {
    pub fn new(table: &str, strategy: Strategy, row_count: u64, fetch_size: u64) -> Self {
        let cursor = match strategy {
            Strategy::Cursor { .. } => ExportCursor::After(None),
            Strategy::Offset => ExportCursor::Offset(0),
        };
        Paginator {
            table: table.to_string(),
            columns: Vec::new(),
            strategy,
            cursor,
            fetch_size: fetch_size.max(1),
            row_count,
            fetched: 0,
            fetches: 0,
            done: false,
        }
    }

    /// Column metadata handed to every fetch, so the source can shape its select list.
    pub fn with_columns(mut self, columns: Vec<ColumnInfo>) -> Self {
        self.columns = columns;
        self
    }

    /// Fetches the next page, or `None` once the table is exhausted.
    ///
    /// The table ends on an empty page, a short page, or once the row count
    /// captured at the start has been read.
    pub async fn next_page<S>(&mut self, source: &S) -> Result<Option<Page>>
    where
        S: TableSource + ?Sized,
    {
        let exhausted = match self.cursor {
            ExportCursor::After(_) => self.fetched >= self.row_count,
            ExportCursor::Offset(offset) => offset >= self.row_count,
        };
        if self.done || exhausted {
            self.done = true;
            return Ok(None);
        }

        let request = match (self.cursor, self.strategy.key()) {
            (ExportCursor::After(after), Some(column)) => PageRequest::After {
                column,
                after,
                limit: self.fetch_size,
            },
            (ExportCursor::Offset(offset), _) => PageRequest::Offset {
                offset,
                limit: self.fetch_size,
            },
            (ExportCursor::After(_), None) => unreachable!("key cursor without a key column"),
        };

        let page = source
            .fetch(&self.table, &self.columns, &request)
            .await
            .map_err(|e| BackupError::table(&self.table, e))?;
        self.fetches += 1;

        let n = page.rows.len() as u64;
        if n == 0 {
            self.done = true;
            return Ok(None);
        }
        self.fetched += n;
        if n < self.fetch_size {
            self.done = true;
        }

        self.cursor = match self.cursor {
            ExportCursor::After(_) => ExportCursor::After(Some(self.last_key(&page)?)),
            ExportCursor::Offset(offset) => ExportCursor::Offset(offset + self.fetch_size),
        };

        Ok(Some(page))
    }

    fn last_key(&self, page: &Page) -> Result<i64> {
        let column = self.strategy.key().unwrap_or_default();
        let idx = page
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| BackupError::table(&self.table, format!("cursor column {} missing", column)))?;
        page.rows
            .iter()
            .rev()
            .find_map(|row| row.get(idx).and_then(|v| v.as_i64()))
            .ok_or_else(|| {
                BackupError::table(&self.table, format!("no integer value in cursor column {}", column))
            })
    }

    pub fn cursor(&self) -> ExportCursor {
        self.cursor
    }

    pub fn fetches(&self) -> usize {
        self.fetches
    }

    pub fn fetched(&self) -> u64 {
        self.fetched
    }

    /// Percentage of the row count captured at the start.
    pub fn progress(&self) -> f64 {
        if self.row_count == 0 {
            100.0
        } else {
            (self.fetched as f64 * 100.0 / self.row_count as f64).min(100.0)
        }
    }
}
