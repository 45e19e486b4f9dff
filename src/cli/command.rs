use crate::config::AllConfig;
use crate::database::DriverRegistry;
use crate::job::JobRunner;
use crate::scheduler::CronTrigger;
use crate::storage::{S3Storage, Storage};
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

/// One job per valid database whose type has a driver. Others are logged and skipped.
pub fn build_jobs(config: &AllConfig, storage: Arc<dyn Storage>) -> Vec<JobRunner> {
    let registry = DriverRegistry::new(&config.app, &config.s3);
    let backup_dir = config.app.get_backup_dir();

    config
        .valid_databases()
        .into_iter()
        .filter_map(|db| match registry.get(&db.db_type) {
            Some(driver) => Some(JobRunner::new(
                db,
                driver,
                storage.clone(),
                backup_dir.clone(),
            )),
            None => {
                error!(
                    database = %db.name,
                    "Invalid database type \"{}\", skipping", db.db_type
                );
                None
            }
        })
        .collect()
}

pub async fn run_worker(config: &AllConfig) -> Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(S3Storage::new(&config.s3)?);
    let jobs = build_jobs(config, storage);
    if jobs.is_empty() {
        anyhow::bail!("No valid database configured");
    }

    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        let job = Arc::new(job);
        let trigger = CronTrigger::new(&job.config().cron)?;

        if config.app.run_on_start {
            let job = job.clone();
            tokio::spawn(async move { job.run().await });
        }

        info!(
            "Starting backup worker. Cron set to \"{}\" for database {}:\"{}\" and S3 bucket: \"{}\". Next backup at {}",
            trigger.pattern(),
            job.config().db_type,
            job.config().name,
            config.s3.bucket,
            trigger
                .next_run()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".into())
        );

        handles.push(trigger.spawn(move || {
            let job = job.clone();
            async move { job.run().await }
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down backup worker");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

pub async fn backup_database(config: &AllConfig, database_name: &str) -> Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(S3Storage::new(&config.s3)?);
    let job = build_jobs(config, storage)
        .into_iter()
        .find(|job| job.config().name == database_name)
        .ok_or_else(|| anyhow::anyhow!("Database {} is not configured", database_name))?;

    info!("Starting backup for database: {}", database_name);
    let outcome = job.execute().await?;
    info!("Backup completed successfully: {:?}", outcome);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ObjectStoreConfig, RawDatabaseConfig};
    use crate::storage::LocalStorage;
    use tempfile::tempdir;

    fn raw(name: &str, db_type: &str) -> RawDatabaseConfig {
        RawDatabaseConfig {
            name: Some(name.into()),
            host: Some("localhost".into()),
            port: Some(5432),
            user: Some("u".into()),
            password: Some("p".into()),
            db_type: Some(db_type.into()),
            ..Default::default()
        }
    }

    #[test]
    fn unknown_types_and_broken_entries_are_skipped() {
        let dir = tempdir().unwrap();
        let config = AllConfig {
            app: AppConfig::default(),
            s3: ObjectStoreConfig {
                endpoint: "e".into(),
                bucket: "b".into(),
                access_key: "a".into(),
                secret_key: "s".into(),
                secure: false,
                force_path_style: true,
                region: "us-east-1".into(),
            },
            databases: vec![
                raw("shop", "postgresql"),
                raw("legacy", "oracle"),
                RawDatabaseConfig::default(),
                raw("events", "clickhouse"),
            ],
        };
        let storage: Arc<dyn Storage> =
            Arc::new(LocalStorage::new(dir.path().to_str().unwrap()).unwrap());

        let names: Vec<String> = build_jobs(&config, storage)
            .iter()
            .map(|j| j.config().name.clone())
            .collect();
        assert_eq!(names, vec!["shop".to_string(), "events".to_string()]);
    }
}
