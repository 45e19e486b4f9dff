use super::clickhouse::ClickHouse;
use super::mysql::MySql;
use super::postgresql::PostgreSql;
use super::{Database, DbType};
use crate::config::{AppConfig, ObjectStoreConfig};
use std::collections::HashMap;
use std::sync::Arc;

/// Database type name to driver. Built once at startup, read-only afterwards.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<DbType, Arc<dyn Database>>,
}

impl DriverRegistry {
    pub fn new(app: &AppConfig, s3: &ObjectStoreConfig) -> Self {
        let mut registry = DriverRegistry::default();
        registry.register(Arc::new(MySql::default()));
        registry.register(Arc::new(PostgreSql::new(
            app.fetch_batch_size,
            app.insert_batch_size,
        )));
        registry.register(Arc::new(ClickHouse::new(s3.clone())));
        registry
    }

    pub fn register(&mut self, driver: Arc<dyn Database>) {
        self.drivers.insert(driver.db_type(), driver);
    }

    /// `None` for names that are not a supported database type.
    pub fn get(&self, db_type: &str) -> Option<Arc<dyn Database>> {
        let kind: DbType = db_type.parse().ok()?;
        self.drivers.get(&kind).cloned()
    }
}
