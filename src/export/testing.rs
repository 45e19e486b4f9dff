//! In-memory [`TableSource`] for exporter tests.

use super::{ColumnInfo, Page, PageRequest, SqlValue, TableSource};
use crate::error::{BackupError, Result};
use std::sync::Mutex;

pub struct MemoryTable {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// `rows` rows of `(id, name)`; `id` is 1..=rows and optionally the primary key.
pub fn int_table(name: &str, rows: u64, primary_key: bool) -> MemoryTable {
    MemoryTable {
        name: name.into(),
        columns: vec![
            ColumnInfo {
                name: "id".into(),
                integer: true,
                primary_key,
                auto_increment: false,
                read_as_text: false,
            },
            ColumnInfo {
                name: "name".into(),
                integer: false,
                primary_key: false,
                auto_increment: false,
                read_as_text: false,
            },
        ],
        rows: (1..=rows as i64)
            .map(|i| vec![SqlValue::Int(i), SqlValue::Text(format!("row{}", i))])
            .collect(),
    }
}

pub struct MemorySource {
    tables: Vec<MemoryTable>,
    fail_on: Option<String>,
    panic_on: Option<String>,
    /// Every call as `"<op> <table>"`.
    pub calls: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new(tables: Vec<MemoryTable>) -> Self {
        MemorySource {
            tables,
            fail_on: None,
            panic_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, table: &str) -> Self {
        self.fail_on = Some(table.into());
        self
    }

    pub fn panicking_on(mut self, table: &str) -> Self {
        self.panic_on = Some(table.into());
        self
    }

    pub fn row_count_of(&self, table: &str) -> u64 {
        self.tables
            .iter()
            .find(|t| t.name == table)
            .map(|t| t.rows.len() as u64)
            .unwrap_or(0)
    }

    pub fn calls_for(&self, table: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.ends_with(&format!(" {}", table)))
            .cloned()
            .collect()
    }

    fn table(&self, op: &str, name: &str) -> Result<&MemoryTable> {
        self.calls.lock().unwrap().push(format!("{} {}", op, name));
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| BackupError::Query(format!("relation {} does not exist", name)))
    }
}

#[async_trait::async_trait]
impl TableSource for MemorySource {
    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.iter().map(|t| t.name.clone()).collect())
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        Ok(self.table("count", table)?.rows.len() as u64)
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        Ok(self.table("columns", table)?.columns.clone())
    }

    async fn fetch(
        &self,
        table: &str,
        _columns: &[ColumnInfo],
        request: &PageRequest<'_>,
    ) -> Result<Page> {
        let t = self.table("fetch", table)?;
        if self.fail_on.as_deref() == Some(table) {
            return Err(BackupError::Query("connection reset".into()));
        }
        if self.panic_on.as_deref() == Some(table) {
            panic!("decoder blew up on {}", table);
        }
        let columns: Vec<String> = t.columns.iter().map(|c| c.name.clone()).collect();
        let rows = match *request {
            PageRequest::After {
                column,
                after,
                limit,
            } => {
                let idx = columns.iter().position(|c| c == column).unwrap();
                let mut rows: Vec<Vec<SqlValue>> = t
                    .rows
                    .iter()
                    .filter(|r| match (after, r[idx].as_i64()) {
                        (Some(a), Some(v)) => v > a,
                        (None, _) => true,
                        (Some(_), None) => false,
                    })
                    .cloned()
                    .collect();
                rows.sort_by_key(|r| r[idx].as_i64());
                rows.truncate(limit as usize);
                rows
            }
            PageRequest::Offset { offset, limit } => t
                .rows
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect(),
        };
        Ok(Page { columns, rows })
    }
}
