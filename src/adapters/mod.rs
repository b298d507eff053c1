//! Adapters - Concrete implementations of ports.

#[cfg(feature = "object-storage")]
pub mod aws;

pub mod ffmpeg;
pub mod http;
pub mod local;

use crate::config::{Config, StorageConfig};
use crate::error::ConfigError;
use crate::ports::storage::StoragePort;
use std::sync::Arc;

/// Pick the storage backend named by the configuration.
pub async fn storage_from_config(config: &Config) -> Result<Arc<dyn StoragePort>, ConfigError> {
    match &config.storage {
        StorageConfig::Local { dir } => Ok(Arc::new(local::FsAdapter::new(
            dir.clone(),
            format!("{}/static", config.public_url),
        ))),
        #[cfg(feature = "object-storage")]
        StorageConfig::ObjectStorage {
            bucket,
            region,
            endpoint,
            public_url,
            presign_ttl,
        } => Ok(Arc::new(
            aws::S3Adapter::connect(
                bucket.clone(),
                region.clone(),
                endpoint.clone(),
                public_url.clone(),
                *presign_ttl,
            )
            .await,
        )),
        #[cfg(not(feature = "object-storage"))]
        StorageConfig::ObjectStorage { .. } => Err(ConfigError::Invalid {
            var: "STORAGE_BACKEND",
            value: "s3".to_string(),
            reason: "built without the object-storage feature".to_string(),
        }),
    }
}
