use super::batcher::{StatementBatcher, DEFAULT_INSERT_BATCH_SIZE};
use super::pagination::{Paginator, Strategy, DEFAULT_FETCH_BATCH_SIZE};
use super::TableSource;
use crate::error::{BackupError, Result};
use std::collections::BTreeSet;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// What the exporter learned about a table before paging through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    pub row_count: u64,
    pub pagination_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableReport {
    Skipped,
    Exported {
        descriptor: TableDescriptor,
        rows: u64,
        fetches: usize,
        statements: usize,
    },
}

/// Appends tables, one after another, to a single dump output.
pub struct TableExporter<'a, S: ?Sized, W> {
    source: &'a S,
    out: &'a mut W,
    skip_tables: &'a BTreeSet<String>,
    fetch_size: u64,
    insert_size: usize,
}

impl<'a, S, W> TableExporter<'a, S, W>
where
    S: TableSource + ?Sized,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(source: &'a S, out: &'a mut W, skip_tables: &'a BTreeSet<String>) -> Self {
        TableExporter {
            source,
            out,
            skip_tables,
            fetch_size: DEFAULT_FETCH_BATCH_SIZE,
            insert_size: DEFAULT_INSERT_BATCH_SIZE,
        }
    }

    pub fn with_batch_sizes(mut self, fetch_size: u64, insert_size: usize) -> Self {
        self.fetch_size = fetch_size;
        self.insert_size = insert_size;
        self
    }

    pub async fn export_table(&mut self, table: &str) -> Result<TableReport> {
        if self.skip_tables.contains(table) {
            info!(table, "Skipping table");
            return Ok(TableReport::Skipped);
        }

        self.out
            .write_all(format!("-- {}\n", table).as_bytes())
            .await?;

        let row_count = self
            .source
            .row_count(table)
            .await
            .map_err(|e| BackupError::table(table, e))?;
        let columns = self
            .source
            .columns(table)
            .await
            .map_err(|e| BackupError::table(table, e))?;

        let strategy = Strategy::select(&columns);
        let descriptor = TableDescriptor {
            name: table.to_string(),
            row_count,
            pagination_key: strategy.key().map(str::to_string),
        };
        match &descriptor.pagination_key {
            Some(key) => debug!(table, key = %key, row_count, "Paging by key"),
            None => warn!(
                table,
                row_count,
                "No integer key, paging by offset; concurrent writes may skip or repeat rows"
            ),
        }

        let insert_size = self.insert_size;
        let mut pager =
            Paginator::new(table, strategy, row_count, self.fetch_size).with_columns(columns);
        let mut batcher: Option<StatementBatcher> = None;

        while let Some(page) = pager.next_page(self.source).await? {
            let batcher = batcher
                .get_or_insert_with(|| StatementBatcher::new(table, &page.columns, insert_size));
            for row in &page.rows {
                batcher.append_row(row);
            }
            // Nothing from this page stays in memory once the next one is fetched.
            self.out.write_all(batcher.flush().as_bytes()).await?;

            info!(
                table,
                "Exported {} of {} rows ({:.1}%)",
                pager.fetched(),
                row_count,
                pager.progress()
            );
        }

        let statements = match batcher.as_mut() {
            Some(batcher) => {
                batcher.finish();
                self.out.write_all(batcher.flush().as_bytes()).await?;
                batcher.statements()
            }
            None => 0,
        };
        self.out.write_all(b"\n").await?;
        self.out.flush().await?;

        Ok(TableReport::Exported {
            descriptor,
            rows: pager.fetched(),
            fetches: pager.fetches(),
            statements,
        })
    }
}

/// Exports every table of `source` sequentially into `out`.
///
/// `on_table` is told the position and name of each table before it is exported.
pub async fn export_database<S, W, F>(
    source: &S,
    out: &mut W,
    skip_tables: &BTreeSet<String>,
    fetch_size: u64,
    insert_size: usize,
    mut on_table: F,
) -> Result<Vec<(String, TableReport)>>
where
    S: TableSource + ?Sized,
    W: AsyncWrite + Unpin + Send,
    F: FnMut(usize, &str) + Send,
{
    let tables = source.list_tables().await?;
    let mut exporter =
        TableExporter::new(source, out, skip_tables).with_batch_sizes(fetch_size, insert_size);

    let mut reports = Vec::with_capacity(tables.len());
    for (index, table) in tables.into_iter().enumerate() {
        on_table(index, &table);
        let report = exporter.export_table(&table).await?;
        reports.push((table, report));
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::testing::{int_table, MemorySource};

    #[tokio::test]
    async fn users_and_empty_logs() {
        let source = MemorySource::new(vec![int_table("users", 10, true), int_table("logs", 0, true)]);
        let mut out = Vec::new();
        let reports = export_database(&source, &mut out, &BTreeSet::new(), 10_000, 1_000, |_, _| {})
            .await
            .unwrap();
        let dump = String::from_utf8(out).unwrap();

        let (users, logs) = dump.split_at(dump.find("-- logs").unwrap());
        assert!(users.starts_with("-- users\n"));
        assert_eq!(users.matches("INSERT INTO \"users\"").count(), 1);
        assert_eq!(users.matches("'row").count(), 10);
        assert_eq!(logs, "-- logs\n\n");

        match &reports[1].1 {
            TableReport::Exported {
                descriptor,
                fetches,
                statements,
                ..
            } => {
                assert_eq!(descriptor.pagination_key.as_deref(), Some("id"));
                assert_eq!(*fetches, 0);
                assert_eq!(*statements, 0);
            }
            other => panic!("unexpected report {:?}", other),
        }
    }

    #[tokio::test]
    async fn large_table_fetches_and_statements() {
        let source = MemorySource::new(vec![int_table("big", 25_000, true)]);
        let mut out = Vec::new();
        let skip = BTreeSet::new();
        let report = TableExporter::new(&source, &mut out, &skip)
            .with_batch_sizes(10_000, 1_000)
            .export_table("big")
            .await
            .unwrap();

        assert_eq!(
            report,
            TableReport::Exported {
                descriptor: TableDescriptor {
                    name: "big".into(),
                    row_count: 25_000,
                    pagination_key: Some("id".into()),
                },
                rows: 25_000,
                fetches: 3,
                statements: 25,
            }
        );
        let fetch_calls = source
            .calls_for("big")
            .into_iter()
            .filter(|c| c.starts_with("fetch"))
            .count();
        assert_eq!(fetch_calls, 3);
        let dump = String::from_utf8(out).unwrap();
        assert_eq!(dump.matches("INSERT INTO").count(), 25);
    }

    #[tokio::test]
    async fn offset_fallback_exports_everything() {
        let source = MemorySource::new(vec![int_table("plain", 2_500, false)]);
        let mut out = Vec::new();
        let skip = BTreeSet::new();
        let report = TableExporter::new(&source, &mut out, &skip)
            .with_batch_sizes(1_000, 300)
            .export_table("plain")
            .await
            .unwrap();

        match report {
            TableReport::Exported {
                descriptor,
                rows,
                fetches,
                statements,
            } => {
                assert_eq!(descriptor.pagination_key, None);
                assert_eq!(rows, 2_500);
                assert_eq!(fetches, 3);
                assert_eq!(statements, 9);
            }
            TableReport::Skipped => panic!("table was skipped"),
        }
        let dump = String::from_utf8(out).unwrap();
        assert!(dump.contains("(2500, 'row2500');"));
    }

    #[tokio::test]
    async fn skipped_tables_are_never_queried() {
        let source = MemorySource::new(vec![int_table("users", 3, true), int_table("secrets", 3, true)]);
        let skip: BTreeSet<String> = ["secrets".to_string()].into();
        let mut out = Vec::new();
        let mut seen = Vec::new();
        let reports = export_database(&source, &mut out, &skip, 10, 10, |index, table| {
            seen.push((index, table.to_string()))
        })
        .await
        .unwrap();

        assert_eq!(reports[1], ("secrets".to_string(), TableReport::Skipped));
        assert_eq!(seen, vec![(0, "users".to_string()), (1, "secrets".to_string())]);
        assert!(source.calls_for("secrets").is_empty());
        let dump = String::from_utf8(out).unwrap();
        assert!(!dump.contains("secrets"));
    }

    #[tokio::test]
    async fn query_failure_aborts_export() {
        let source =
            MemorySource::new(vec![int_table("a", 3, true), int_table("b", 3, true)]).failing_on("b");
        let mut out = Vec::new();
        let err = export_database(&source, &mut out, &BTreeSet::new(), 10, 10, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::TableExport { ref table, .. } if table == "b"));
    }
}
