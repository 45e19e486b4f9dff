use crate::error::Result;
use std::path::Path;

pub mod local_storage;
pub mod s3_compatible;

pub use local_storage::LocalStorage;
pub use s3_compatible::S3Storage;

#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Stores the file at `file_path` under `key`, private to the bucket owner.
    async fn upload(&self, file_path: &Path, key: &str) -> Result<()>;
}
