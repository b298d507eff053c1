use crate::error::StorageError;
use crate::ports::storage::{validate_key, StoragePort};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Local filesystem backend. Keys map to paths under `root`, and URLs point at
/// the origin server's static route for that root.
#[derive(Clone, Debug)]
pub struct FsAdapter {
    root: PathBuf,
    base_url: String,
}

impl FsAdapter {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Absolute path of a key, after validation.
    pub fn path_of(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl StoragePort for FsAdapter {
    async fn put(&self, local_path: &Path, key: &str) -> Result<String, StorageError> {
        let key_path = self.path_of(key)?;
        if key_path != local_path {
            if let Some(parent) = key_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::io(parent, e))?;
            }
            tokio::fs::copy(local_path, &key_path)
                .await
                .map_err(|e| StorageError::io(local_path, e))?;
        }
        self.resolve(key).await
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let key_path = self.path_of(key)?;
        if !tokio::fs::try_exists(&key_path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        if key_path != local_path {
            if let Some(parent) = local_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::io(parent, e))?;
            }
            tokio::fs::copy(&key_path, local_path)
                .await
                .map_err(|e| StorageError::io(&key_path, e))?;
        }
        Ok(())
    }

    async fn resolve(&self, key: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        Ok(format!("{}/{}", self.base_url, key))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let key_path = self.path_of(key)?;
        match tokio::fs::remove_file(&key_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(key_path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_resolve_download_delete() {
        let root = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let adapter = FsAdapter::new(root.path(), "http://localhost:3000/static/");

        let local = scratch.path().join("artifact.mp4");
        tokio::fs::write(&local, b"encoded").await.unwrap();

        let url = adapter.put(&local, "web-videos/abc-480.mp4").await.unwrap();
        assert_eq!(url, "http://localhost:3000/static/web-videos/abc-480.mp4");
        assert_eq!(adapter.resolve("web-videos/abc-480.mp4").await.unwrap(), url);
        assert!(root.path().join("web-videos/abc-480.mp4").exists());

        let copy = scratch.path().join("nested/copy.mp4");
        adapter.download("web-videos/abc-480.mp4", &copy).await.unwrap();
        assert_eq!(tokio::fs::read(&copy).await.unwrap(), b"encoded");

        adapter.delete("web-videos/abc-480.mp4").await.unwrap();
        assert!(!root.path().join("web-videos/abc-480.mp4").exists());
        // Deleting twice is not an error.
        adapter.delete("web-videos/abc-480.mp4").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_key_and_traversal() {
        let root = tempdir().unwrap();
        let adapter = FsAdapter::new(root.path(), "http://localhost:3000/static");
        let target = root.path().join("out.mp4");

        assert!(matches!(
            adapter.download("web-videos/missing.mp4", &target).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            adapter.put(&target, "../escape.mp4").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
