use crate::compression::compress_file;
use crate::config::DatabaseConfig;
use crate::database::{BackupOutcome, Database};
use crate::error::{BackupError, Result};
use crate::pipeline::ArtifactGuard;
use crate::storage::Storage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Dump compressed and uploaded under this key.
    Uploaded { key: String },
    /// The engine wrote the backup to object storage itself.
    Remote { location: String },
}

/// Everything needed to back up one configured database.
pub struct JobRunner {
    config: DatabaseConfig,
    driver: Arc<dyn Database>,
    storage: Arc<dyn Storage>,
    backup_dir: PathBuf,
}

impl JobRunner {
    pub fn new(
        config: DatabaseConfig,
        driver: Arc<dyn Database>,
        storage: Arc<dyn Storage>,
        backup_dir: PathBuf,
    ) -> Self {
        JobRunner {
            config,
            driver,
            storage,
            backup_dir,
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Runs one backup. Failures are logged and never reach the caller.
    pub async fn run(&self) {
        match self.execute().await {
            Ok(JobOutcome::Uploaded { key }) => {
                info!(database = %self.config.name, "Backup finished {}", key)
            }
            Ok(JobOutcome::Remote { location }) => {
                info!(database = %self.config.name, "Backup to S3 finished in {}", location)
            }
            Err(e) => error!(database = %self.config.name, "Error while preparing backup: {}", e),
        }
    }

    /// Export, compress, upload, clean up.
    ///
    /// A failed export uploads nothing. Local files are removed on every path
    /// once they exist, whether the upload worked or not.
    pub async fn execute(&self) -> Result<JobOutcome> {
        let artifact = match self.driver.backup(&self.config, &self.backup_dir).await? {
            BackupOutcome::Local(artifact) => artifact,
            BackupOutcome::Remote { location } => return Ok(JobOutcome::Remote { location }),
        };

        let compressed = artifact.with_suffix(".gz");
        let mut guard = ArtifactGuard::new();
        guard.track(&artifact.local_path);
        // Gzip may fail after creating its output.
        guard.track(&compressed.local_path);

        let result = async {
            let path = compress_file(&artifact.local_path).await?;

            info!(database = %self.config.name, "Uploading database backup {}", compressed.logical_key);
            self.storage.upload(&path, &compressed.logical_key).await?;
            Ok::<_, BackupError>(JobOutcome::Uploaded {
                key: compressed.logical_key.clone(),
            })
        }
        .await;

        guard.cleanup().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::sample_config;
    use crate::database::{BackupArtifact, DbType};
    use crate::storage::LocalStorage;
    use std::path::Path;
    use tempfile::tempdir;

    /// Writes a small dump, or fails to connect when told to.
    struct FakeDriver {
        unreachable: Vec<String>,
    }

    /// Leaves a directory where the dump should be, so gzip fails mid-way.
    struct UnreadableDumpDriver;

    #[async_trait::async_trait]
    impl Database for UnreadableDumpDriver {
        fn db_type(&self) -> DbType {
            DbType::Postgresql
        }

        async fn backup(&self, config: &DatabaseConfig, backup_dir: &Path) -> Result<BackupOutcome> {
            let artifact = BackupArtifact::for_database(DbType::Postgresql, config, backup_dir);
            tokio::fs::create_dir_all(&artifact.local_path).await?;
            Ok(BackupOutcome::Local(artifact))
        }
    }

    #[async_trait::async_trait]
    impl Database for FakeDriver {
        fn db_type(&self) -> DbType {
            DbType::Postgresql
        }

        async fn backup(&self, config: &DatabaseConfig, backup_dir: &Path) -> Result<BackupOutcome> {
            if self.unreachable.contains(&config.name) {
                return Err(BackupError::Connection {
                    database: config.name.clone(),
                    reason: "connection refused".into(),
                });
            }
            let artifact = BackupArtifact::for_database(DbType::Postgresql, config, backup_dir);
            tokio::fs::create_dir_all(artifact.local_path.parent().unwrap()).await?;
            tokio::fs::write(&artifact.local_path, format!("-- {}\n", config.name)).await?;
            Ok(BackupOutcome::Local(artifact))
        }
    }

    struct RemoteDriver;

    #[async_trait::async_trait]
    impl Database for RemoteDriver {
        fn db_type(&self) -> DbType {
            DbType::Clickhouse
        }

        async fn backup(&self, config: &DatabaseConfig, _: &Path) -> Result<BackupOutcome> {
            Ok(BackupOutcome::Remote {
                location: format!("s3://b/backup/clickhouse_{}/now", config.name),
            })
        }
    }

    struct BrokenStorage;

    #[async_trait::async_trait]
    impl Storage for BrokenStorage {
        async fn upload(&self, _: &Path, _: &str) -> Result<()> {
            Err(BackupError::Upload("HTTP 503".into()))
        }
    }

    fn files_under(dir: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    out.extend(files_under(&path));
                } else {
                    out.push(path);
                }
            }
        }
        out
    }

    #[tokio::test]
    async fn one_failed_connection_does_not_affect_others() {
        let work = tempdir().unwrap();
        let bucket = tempdir().unwrap();
        let driver: Arc<dyn Database> = Arc::new(FakeDriver {
            unreachable: vec!["orders".into()],
        });
        let storage: Arc<dyn Storage> =
            Arc::new(LocalStorage::new(bucket.path().to_str().unwrap()).unwrap());

        let handles: Vec<_> = ["users", "orders", "billing"]
            .into_iter()
            .map(|name| {
                let job = JobRunner::new(
                    sample_config(name),
                    driver.clone(),
                    storage.clone(),
                    work.path().to_path_buf(),
                );
                tokio::spawn(async move { job.execute().await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert!(matches!(results[0], Ok(JobOutcome::Uploaded { .. })));
        assert!(matches!(results[1], Err(BackupError::Connection { .. })));
        assert!(matches!(results[2], Ok(JobOutcome::Uploaded { .. })));

        let uploaded = files_under(bucket.path());
        assert_eq!(uploaded.len(), 2);
        assert!(uploaded.iter().all(|p| p.to_str().unwrap().ends_with(".sql.gz")));
        assert!(bucket.path().join("backup/postgresql_users").is_dir());
        assert!(bucket.path().join("backup/postgresql_billing").is_dir());
        assert!(!bucket.path().join("backup/postgresql_orders").exists());

        assert!(files_under(work.path()).is_empty());
    }

    #[tokio::test]
    async fn upload_failure_still_cleans_up() {
        let work = tempdir().unwrap();
        let job = JobRunner::new(
            sample_config("users"),
            Arc::new(FakeDriver { unreachable: vec![] }),
            Arc::new(BrokenStorage),
            work.path().to_path_buf(),
        );

        let err = job.execute().await.unwrap_err();
        assert!(matches!(err, BackupError::Upload(_)));
        assert!(files_under(work.path()).is_empty());

        // `run` swallows the same failure.
        job.run().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn compression_failure_removes_partial_archive() {
        let work = tempdir().unwrap();
        let bucket = tempdir().unwrap();
        let job = JobRunner::new(
            sample_config("users"),
            Arc::new(UnreadableDumpDriver),
            Arc::new(LocalStorage::new(bucket.path().to_str().unwrap()).unwrap()),
            work.path().to_path_buf(),
        );

        let err = job.execute().await.unwrap_err();
        assert!(matches!(err, BackupError::Compression(_)));
        assert!(files_under(work.path()).is_empty());
        assert!(files_under(bucket.path()).is_empty());
    }

    #[tokio::test]
    async fn remote_backups_skip_local_pipeline() {
        let work = tempdir().unwrap();
        let job = JobRunner::new(
            sample_config("events"),
            Arc::new(RemoteDriver),
            Arc::new(BrokenStorage),
            work.path().to_path_buf(),
        );
        assert_eq!(
            job.execute().await.unwrap(),
            JobOutcome::Remote {
                location: "s3://b/backup/clickhouse_events/now".into()
            }
        );
    }
}
