use thiserror::Error;

/// Everything that can go wrong inside one backup job.
///
/// None of these ever leave a [`crate::job::JobRunner`]; they end up in the log.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("cannot connect to database {database}: {reason}")]
    Connection { database: String, reason: String },

    #[error("export of table {table} failed: {reason}")]
    TableExport { table: String, reason: String },

    #[error("query failed: {0}")]
    Query(String),

    #[error("dump tool failed: {0}")]
    Dump(String),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BackupError {
    pub fn table(table: &str, reason: impl ToString) -> Self {
        BackupError::TableExport {
            table: table.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = BackupError> = std::result::Result<T, E>;
