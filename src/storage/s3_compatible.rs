use crate::config::ObjectStoreConfig;
use crate::error::{BackupError, Result};
use crate::storage::Storage;
use s3::{creds::Credentials, Bucket, Region};
use std::path::Path;
use tracing::info;

pub struct S3Storage {
    pub bucket: Box<Bucket>,
    pub bucket_name: String,
}

#[async_trait::async_trait]
impl Storage for S3Storage {
    async fn upload(&self, file_path: &Path, key: &str) -> Result<()> {
        let mut file = tokio::fs::File::open(file_path).await.map_err(|e| {
            BackupError::Upload(format!("failed to open {}: {}", file_path.display(), e))
        })?;

        info!("Uploading database backup {}", file_path.display());
        let res = self
            .bucket
            .put_object_stream(&mut file, key)
            .await
            .map_err(|e| BackupError::Upload(format!("S3 upload failed: {}", e)))?;

        if res.status_code() == 200 {
            info!(
                "Successfully uploaded: {} to s3://{}/{}",
                file_path.display(),
                self.bucket_name,
                key
            );
            Ok(())
        } else {
            Err(BackupError::Upload(format!(
                "S3 upload failed with HTTP code: {}",
                res.status_code()
            )))
        }
    }
}

impl S3Storage {
    pub fn new(config: &ObjectStoreConfig) -> Result<Self> {
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint_url(),
        };

        let credentials = Credentials {
            access_key: Some(config.access_key.clone()),
            secret_key: Some(config.secret_key.clone()),
            security_token: None,
            session_token: None,
            expiration: None,
        };

        let mut bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| BackupError::Config(format!("invalid S3 bucket settings: {}", e)))?;
        if config.force_path_style {
            bucket = bucket.with_path_style();
        }
        bucket.add_header("x-amz-acl", "private");

        Ok(S3Storage {
            bucket,
            bucket_name: config.bucket.clone(),
        })
    }
}
