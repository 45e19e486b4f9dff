//! Table-by-table logical export into INSERT statements.
//!
//! The exporter only needs a [`TableSource`]: something that can list tables,
//! describe their columns, count rows and return bounded pages of rows.

pub mod batcher;
pub mod pagination;
pub mod table;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::Result;
pub use table::{export_database, TableExporter, TableReport};
pub use value::SqlValue;

/// Column metadata needed to pick a pagination strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Integer column (smallint, integer, bigint).
    pub integer: bool,
    /// Sole column of the primary key.
    pub primary_key: bool,
    /// Filled from a sequence or identity.
    pub auto_increment: bool,
    /// Fetched in its text form because the engine's binary form has no decoding here.
    pub read_as_text: bool,
}

/// One bounded fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest<'a> {
    /// `WHERE column > after ORDER BY column LIMIT limit`. No bound on the first page.
    After {
        column: &'a str,
        after: Option<i64>,
        limit: u64,
    },
    /// `OFFSET offset LIMIT limit`.
    Offset { offset: u64, limit: u64 },
}

/// Rows returned by one fetch. Every row has one value per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

#[async_trait::async_trait]
pub trait TableSource: Send + Sync {
    async fn list_tables(&self) -> Result<Vec<String>>;
    async fn row_count(&self, table: &str) -> Result<u64>;
    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;
    /// `columns` is what [`TableSource::columns`] reported, or empty to select everything as is.
    async fn fetch(
        &self,
        table: &str,
        columns: &[ColumnInfo],
        request: &PageRequest<'_>,
    ) -> Result<Page>;
}
