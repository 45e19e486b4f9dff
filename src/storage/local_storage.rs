use crate::error::{BackupError, Result};
use crate::storage::Storage;
use crate::utils::resolve_path;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

/// Keeps "uploaded" objects in a local directory, laid out by key.
pub struct LocalStorage {
    pub base_path: PathBuf,
}

#[async_trait::async_trait]
impl Storage for LocalStorage {
    async fn upload(&self, file_path: &std::path::Path, key: &str) -> Result<()> {
        let target_path = self.base_path.join(key.trim_start_matches('/'));
        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::copy(file_path, &target_path)
            .await
            .map_err(|e| BackupError::Upload(format!("Failed to copy file: {}", e)))?;
        info!(
            "Successfully uploaded: {} to {}",
            file_path.display(),
            target_path.display()
        );
        Ok(())
    }
}

impl LocalStorage {
    pub fn new(base_path: &str) -> Result<Self> {
        let base_path = resolve_path(base_path).map_err(BackupError::Config)?;
        Ok(LocalStorage { base_path })
    }
}
