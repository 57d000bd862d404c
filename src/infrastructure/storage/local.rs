use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::device::{join_path, StorageDevice, StorageError, StorageResult};

/// Device backed by the local filesystem, confined to `root`.
#[derive(Debug, Clone)]
pub struct LocalDevice {
    root: PathBuf,
}

impl LocalDevice {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let candidate = Path::new(path);
        let escapes = candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        if escapes || !candidate.starts_with(&self.root) {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(candidate.to_path_buf())
    }
}

#[async_trait]
impl StorageDevice for LocalDevice {
    fn get_path(&self, id: &str) -> String {
        join_path(&self.root.to_string_lossy(), id)
    }

    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let resolved = self.resolve(path)?;
        match tokio::fs::read(&resolved).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::not_found(path)),
            Err(e) => Err(StorageError::ReadFailed(format!("{}: {}", path, e))),
        }
    }

    async fn write(&self, path: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(path, content_type, bytes = data.len(), "Writing to local device");
        tokio::fs::write(&resolved, data)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", path, e)))
    }

    async fn delete_path(&self, path: &str) -> StorageResult<()> {
        let resolved = self.resolve(path)?;
        let metadata = match tokio::fs::metadata(&resolved).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&resolved).await
        } else {
            tokio::fs::remove_file(&resolved).await
        };
        result.map_err(|e| StorageError::delete_failed(format!("{}: {}", path, e)))
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let resolved = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&resolved).await?)
    }
}
