use async_trait::async_trait;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Path escapes device root: {0}")]
    InvalidPath(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn delete_failed(msg: impl Into<String>) -> Self {
        Self::DeleteFailed(msg.into())
    }
}

/// Tenant storage device. Paths are the device-absolute strings stored on
/// records (`get_path` output and file `path` attributes).
#[async_trait]
pub trait StorageDevice: Send + Sync {
    /// Base path for an identifier, e.g. the directory of a video's renditions.
    fn get_path(&self, id: &str) -> String;

    async fn read(&self, path: &str) -> StorageResult<Vec<u8>>;

    async fn write(&self, path: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Removes everything at or below `path`. Missing paths are not an error.
    async fn delete_path(&self, path: &str) -> StorageResult<()>;

    async fn exists(&self, path: &str) -> StorageResult<bool>;
}

pub(crate) fn join_path(root: &str, id: &str) -> String {
    format!("{}/{}", root.trim_end_matches('/'), id.trim_start_matches('/'))
}
