use crate::error::{BackupError, Result};
use crate::scheduler::parse_schedule;
use crate::utils::resolve_path;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::error;

pub const DEFAULT_CRON: &str = "0 */6 * * *";

#[derive(Debug, Deserialize, Clone)]
pub struct AllConfig {
    #[serde(default)]
    pub app: AppConfig,
    pub s3: ObjectStoreConfig,
    #[serde(default)]
    pub databases: Vec<RawDatabaseConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
    #[serde(default)]
    pub run_on_start: bool,
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: u64,
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
}

/// Shared, read-only object storage settings. Built once at startup.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default = "default_region")]
    pub region: String,
}

/// A database entry as it appears in the configuration source, before validation.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawDatabaseConfig {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub skip_tables: Vec<String>,
    pub cron: Option<String>,
    pub db_type: Option<String>,
    #[serde(default)]
    pub tls: bool,
}

/// One validated backup target. Owned by exactly one job.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub skip_tables: BTreeSet<String>,
    pub cron: String,
    pub db_type: String,
    pub tls: bool,
}

fn default_backup_dir() -> String {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("~"))
        .join(".dbbackup")
        .display()
        .to_string()
}

fn default_fetch_batch_size() -> u64 {
    10_000
}

fn default_insert_batch_size() -> usize {
    1_000
}

fn default_region() -> String {
    "us-east-1".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            backup_dir: default_backup_dir(),
            run_on_start: false,
            fetch_batch_size: default_fetch_batch_size(),
            insert_batch_size: default_insert_batch_size(),
        }
    }
}

impl AppConfig {
    pub fn get_backup_dir(&self) -> PathBuf {
        match resolve_path(&self.backup_dir) {
            Ok(p) => p,
            Err(_) => AppConfig::default().backup_dir.into(),
        }
    }
}

impl ObjectStoreConfig {
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("endpoint", &self.endpoint),
            ("bucket", &self.bucket),
            ("access_key", &self.access_key),
            ("secret_key", &self.secret_key),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BackupError::Config(format!(
                "object storage settings missing: {}",
                missing.join(", ")
            )))
        }
    }

    /// Endpoint with the scheme implied by `secure`, unless one is already given.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.trim_end_matches('/').to_string()
        } else {
            let scheme = if self.secure { "https" } else { "http" };
            format!("{}://{}", scheme, self.endpoint.trim_end_matches('/'))
        }
    }
}

impl RawDatabaseConfig {
    pub fn validate(&self) -> Result<DatabaseConfig> {
        fn required(field: &str, value: &Option<String>) -> Result<String> {
            match value {
                Some(v) if !v.trim().is_empty() => Ok(v.clone()),
                _ => Err(BackupError::Config(format!("missing field `{}`", field))),
            }
        }

        let cron = self.cron.clone().unwrap_or_else(|| DEFAULT_CRON.into());
        parse_schedule(&cron)?;

        Ok(DatabaseConfig {
            name: required("name", &self.name)?,
            host: required("host", &self.host)?,
            port: self
                .port
                .ok_or_else(|| BackupError::Config("missing or invalid field `port`".into()))?,
            user: required("user", &self.user)?,
            password: required("password", &self.password)?,
            skip_tables: self
                .skip_tables
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            cron,
            db_type: required("db_type", &self.db_type)?,
            tls: self.tls,
        })
    }
}

impl AllConfig {
    /// Validated databases. Entries that fail validation are logged and left out.
    pub fn valid_databases(&self) -> Vec<DatabaseConfig> {
        self.databases
            .iter()
            .enumerate()
            .filter_map(|(i, raw)| match raw.validate() {
                Ok(db) => Some(db),
                Err(e) => {
                    error!(index = i, "Skipping database entry: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Flat `S3_*` / `DB_*_<i>` environment layout.
    pub fn from_env_vars(vars: &HashMap<String, String>) -> Result<AllConfig> {
        let get = |key: &str| vars.get(key).cloned().unwrap_or_default();
        let flag = |key: &str| vars.get(key).map(|v| v == "true").unwrap_or(false);

        for key in [
            "S3_BUCKET",
            "DB_NUMBER",
            "S3_ACCESS_KEY",
            "S3_SECRET_KEY",
            "S3_ENDPOINT",
            "S3_SSL",
            "S3_FORCE_PATH_STYLE",
        ] {
            if get(key).is_empty() {
                return Err(BackupError::Config(format!(
                    "missing environment variable {}",
                    key
                )));
            }
        }

        let s3 = ObjectStoreConfig {
            endpoint: get("S3_ENDPOINT"),
            bucket: get("S3_BUCKET"),
            access_key: get("S3_ACCESS_KEY"),
            secret_key: get("S3_SECRET_KEY"),
            secure: flag("S3_SSL"),
            force_path_style: flag("S3_FORCE_PATH_STYLE"),
            region: vars
                .get("S3_REGION")
                .cloned()
                .unwrap_or_else(default_region),
        };

        let count: usize = get("DB_NUMBER")
            .parse()
            .map_err(|_| BackupError::Config("DB_NUMBER is not a number".into()))?;

        let databases = (0..count)
            .map(|i| {
                let opt = |key: &str| vars.get(&format!("{}_{}", key, i)).cloned();
                RawDatabaseConfig {
                    name: opt("DB_NAME"),
                    host: opt("DB_HOST"),
                    port: opt("DB_PORT").and_then(|p| p.parse().ok()),
                    user: opt("DB_USER"),
                    password: opt("DB_PASS"),
                    skip_tables: opt("DB_SKIP_TABLES")
                        .map(|s| s.split(',').map(str::to_string).collect())
                        .unwrap_or_default(),
                    cron: opt("DB_CRON_PATTERN"),
                    db_type: opt("DB_TYPE"),
                    tls: opt("DB_TLS").map(|v| v == "true").unwrap_or(false),
                }
            })
            .collect();

        let mut app = AppConfig::default();
        app.run_on_start = flag("RUN_ON_START");
        if let Some(dir) = vars.get("BACKUP_DIR") {
            app.backup_dir = dir.clone();
        }

        Ok(AllConfig { app, s3, databases })
    }
}

/// Loads the configuration file, overridable through `DBBACKUP__*` variables.
/// Without a file the flat environment layout is used.
pub fn get_all_config(config_path: Option<&str>) -> Result<AllConfig> {
    let config = match config_path {
        Some(path) => Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("DBBACKUP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<AllConfig>())
            .map_err(|e| BackupError::Config(e.to_string()))?,
        None => AllConfig::from_env_vars(&std::env::vars().collect())?,
    };

    config.s3.validate()?;
    Ok(config)
}
