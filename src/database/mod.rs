pub mod clickhouse;
pub mod mysql;
pub mod postgresql;
pub mod registry;

use crate::config::DatabaseConfig;
use crate::error::{BackupError, Result};
use crate::utils::{dump_file_name, object_key};
use chrono::Local;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use registry::DriverRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbType {
    Mysql,
    Postgresql,
    Clickhouse,
}

impl DbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Mysql => "mysql",
            DbType::Postgresql => "postgresql",
            DbType::Clickhouse => "clickhouse",
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbType {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(DbType::Mysql),
            "postgresql" => Ok(DbType::Postgresql),
            "clickhouse" => Ok(DbType::Clickhouse),
            other => Err(BackupError::Config(format!("unknown database type `{}`", other))),
        }
    }
}

/// A local file on its way to object storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub local_path: PathBuf,
    pub logical_key: String,
}

impl BackupArtifact {
    /// `<backup_dir>/<type>_<name>/dump_<timestamp>.sql`, keyed under the same prefix.
    pub fn for_database(db_type: DbType, config: &DatabaseConfig, backup_dir: &Path) -> Self {
        let prefix = format!("{}_{}", db_type, config.name);
        let file_name = dump_file_name(Local::now());
        BackupArtifact {
            local_path: backup_dir.join(&prefix).join(&file_name),
            logical_key: object_key(db_type.as_str(), &config.name, &file_name),
        }
    }

    /// The artifact with `suffix` appended to both path and key.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        let mut path = self.local_path.clone().into_os_string();
        path.push(suffix);
        BackupArtifact {
            local_path: PathBuf::from(path),
            logical_key: format!("{}{}", self.logical_key, suffix),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// A dump file that still has to be compressed, uploaded and removed.
    Local(BackupArtifact),
    /// The engine wrote the backup to object storage itself.
    Remote { location: String },
}

#[async_trait::async_trait]
pub trait Database: Send + Sync {
    fn db_type(&self) -> DbType;

    async fn backup(&self, config: &DatabaseConfig, backup_dir: &Path) -> Result<BackupOutcome>;
}
