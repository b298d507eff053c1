use crate::error::StorageError;
use async_trait::async_trait;
use std::path::Path;

/// Capability interface over where artifacts live. Every URL it hands out must
/// be fetchable with a plain GET by whoever holds it, followers included.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Upload a file from a local path to storage, returning its public URL
    async fn put(&self, local_path: &Path, key: &str) -> Result<String, StorageError>;

    /// Download a file from storage to a local path
    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError>;

    /// Public URL of an already stored key
    async fn resolve(&self, key: &str) -> Result<String, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Reject keys that could escape the storage root.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
