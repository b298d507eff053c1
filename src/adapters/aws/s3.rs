use crate::error::StorageError;
use crate::ports::storage::{validate_key, StoragePort};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// S3Adapter implements StoragePort for S3-compatible object storage.
#[derive(Clone)]
pub struct S3Adapter {
    client: Client,
    bucket: String,
    public_url: Option<String>,
    presign_ttl: Duration,
}

impl S3Adapter {
    pub fn new(
        client: Client,
        bucket: String,
        public_url: Option<String>,
        presign_ttl: Duration,
    ) -> Self {
        Self {
            client,
            bucket,
            public_url: public_url.map(|url| url.trim_end_matches('/').to_string()),
            presign_ttl,
        }
    }

    /// Build a client from the default AWS credential chain, optionally
    /// pointed at a custom endpoint (MinIO, Garage, ...).
    pub async fn connect(
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        public_url: Option<String>,
        presign_ttl: Duration,
    ) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self::new(
            Client::from_conf(builder.build()),
            bucket,
            public_url,
            presign_ttl,
        )
    }
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("m3u8") => "application/vnd.apple.mpegurl",
        _ => "application/octet-stream",
    }
}

fn backend<E: std::fmt::Display>(operation: &'static str, key: &str) -> impl FnOnce(E) -> StorageError {
    let key = key.to_string();
    move |e| StorageError::Backend(format!("{} {}: {}", operation, key, e))
}

#[async_trait]
impl StoragePort for S3Adapter {
    async fn put(&self, local_path: &Path, key: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::Backend(format!("read {}: {}", local_path.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type_for(key))
            .body(body)
            .send()
            .await
            .map_err(backend("put", key))?;
        debug!(bucket = %self.bucket, key, "object stored");

        self.resolve(key).await
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        validate_key(key)?;
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(backend("get", key)(e)),
        };

        let body = resp.body.collect().await.map_err(backend("get", key))?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
        tokio::fs::write(local_path, body.into_bytes())
            .await
            .map_err(|e| StorageError::io(local_path, e))?;
        Ok(())
    }

    async fn resolve(&self, key: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        if let Some(base) = &self.public_url {
            return Ok(format!("{}/{}", base, key));
        }

        let config = PresigningConfig::expires_in(self.presign_ttl).map_err(backend("presign", key))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(backend("presign", key))?;
        Ok(request.uri().to_string())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(backend("delete", key))?;
        Ok(())
    }
}
