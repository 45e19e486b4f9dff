use super::{BackupOutcome, Database, DbType};
use crate::config::{DatabaseConfig, ObjectStoreConfig};
use crate::error::{BackupError, Result};
use crate::utils::backup_timestamp;
use chrono::Local;
use std::path::Path;
use tracing::info;

/// Native `BACKUP DATABASE ... TO S3(...)`; ClickHouse writes to the bucket itself.
#[derive(Debug, Clone)]
pub struct ClickHouse {
    s3: ObjectStoreConfig,
    http: reqwest::Client,
}

fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

impl ClickHouse {
    pub fn new(s3: ObjectStoreConfig) -> Self {
        ClickHouse {
            s3,
            http: reqwest::Client::new(),
        }
    }

    /// `<endpoint>/<bucket>/backup/clickhouse_<name>/<timestamp>`
    pub fn destination(&self, database: &str, timestamp: &str) -> String {
        format!(
            "{}/{}/backup/{}_{}/{}",
            self.s3.endpoint_url(),
            self.s3.bucket,
            DbType::Clickhouse,
            database,
            timestamp
        )
    }

    pub fn backup_query(&self, database: &str, destination: &str) -> String {
        format!(
            "BACKUP DATABASE `{}` TO S3({}, {}, {})",
            database.replace('`', "\\`"),
            literal(destination),
            literal(&self.s3.access_key),
            literal(&self.s3.secret_key)
        )
    }
}

#[async_trait::async_trait]
impl Database for ClickHouse {
    fn db_type(&self) -> DbType {
        DbType::Clickhouse
    }

    async fn backup(&self, config: &DatabaseConfig, _backup_dir: &Path) -> Result<BackupOutcome> {
        let destination = self.destination(&config.name, &backup_timestamp(Local::now()));
        let scheme = if config.tls { "https" } else { "http" };
        let url = format!("{}://{}:{}/", scheme, config.host, config.port);

        info!(database = %config.name, "Starting native backup to {}", destination);
        let response = self
            .http
            .post(&url)
            .header("X-ClickHouse-User", &config.user)
            .header("X-ClickHouse-Key", &config.password)
            .query(&[("database", config.name.as_str())])
            .body(self.backup_query(&config.name, &destination))
            .send()
            .await
            .map_err(|e| BackupError::Connection {
                database: config.name.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackupError::Dump(format!(
                "clickhouse backup of {} failed with HTTP {}: {}",
                config.name,
                status,
                body.trim()
            )));
        }

        Ok(BackupOutcome::Remote {
            location: destination,
        })
    }
}
