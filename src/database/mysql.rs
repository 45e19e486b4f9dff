use super::{BackupArtifact, BackupOutcome, Database, DbType};
use crate::config::DatabaseConfig;
use crate::error::{BackupError, Result};
use crate::pipeline::ArtifactGuard;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tracing::info;

pub const MYSQLDUMP: &str = "mysqldump";

/// Delegates to the external `mysqldump` binary.
#[derive(Debug, Clone)]
pub struct MySql {
    program: String,
}

impl Default for MySql {
    fn default() -> Self {
        MySql::new(MYSQLDUMP)
    }
}

impl MySql {
    pub fn new(program: &str) -> Self {
        MySql {
            program: program.to_string(),
        }
    }

    fn args(config: &DatabaseConfig) -> Vec<String> {
        let mut args = vec![
            "-h".to_string(),
            config.host.clone(),
            "-P".to_string(),
            config.port.to_string(),
            "-u".to_string(),
            config.user.clone(),
            "--single-transaction".to_string(),
            "--skip-dump-date".to_string(),
            "--extended-insert".to_string(),
        ];
        for table in &config.skip_tables {
            args.push(format!("--ignore-table={}.{}", config.name, table));
        }
        args.push(config.name.clone());
        args
    }
}

#[async_trait::async_trait]
impl Database for MySql {
    fn db_type(&self) -> DbType {
        DbType::Mysql
    }

    async fn backup(&self, config: &DatabaseConfig, backup_dir: &Path) -> Result<BackupOutcome> {
        let artifact = BackupArtifact::for_database(DbType::Mysql, config, backup_dir);
        if let Some(parent) = artifact.local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        info!(database = %config.name, "Preparing database backup {}", artifact.local_path.display());

        // Removed unless the dump completes, whatever way this future ends.
        let mut guard = ArtifactGuard::new();
        guard.track(&artifact.local_path);

        // stdout goes straight to the dump file; nothing is buffered here.
        let file = std::fs::File::create(&artifact.local_path)?;
        let spawned = tokio::process::Command::new(&self.program)
            .args(Self::args(config))
            .env("MYSQL_PWD", &config.password)
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                guard.cleanup().await;
                return Err(BackupError::Dump(format!("cannot start {}: {}", self.program, e)));
            }
        };

        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            pipe.read_to_string(&mut stderr).await?;
        }
        let status = child.wait().await?;

        if !status.success() {
            guard.cleanup().await;
            let reason = format!(
                "{} failed for database {}: {}",
                self.program,
                config.name,
                stderr.trim()
            );
            return Err(if stderr.contains("Can't connect") || stderr.contains("Access denied") {
                BackupError::Connection {
                    database: config.name.clone(),
                    reason,
                }
            } else {
                BackupError::Dump(reason)
            });
        }

        guard.release();
        Ok(BackupOutcome::Local(artifact))
    }
}
