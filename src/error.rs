use thiserror::Error;

use crate::infrastructure::db::StoreError;
use crate::infrastructure::media::MediaError;
use crate::infrastructure::redis::LockError;
use crate::infrastructure::storage::StorageError;
use crate::modules::transcoding::model::RenditionStatus;
use crate::modules::transcoding::payload::PayloadError;

pub type TranscodeResult<T> = Result<T, TranscodeError>;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Video not found: {0}")]
    VideoNotFound(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Not a valid media file: {0}")]
    InvalidMedia(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Rendition {0} is being processed by another worker")]
    Busy(String),

    #[error("Manifest parse failed: {0}")]
    Manifest(String),

    #[error("Encoder produced no artifacts")]
    NoArtifacts,

    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition {
        from: RenditionStatus,
        to: RenditionStatus,
    },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Media engine error: {0}")]
    Media(MediaError),

    #[error("Document store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Lease error: {0}")]
    Lock(#[from] LockError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<MediaError> for TranscodeError {
    fn from(error: MediaError) -> Self {
        match error {
            MediaError::Cancelled => TranscodeError::Cancelled,
            other => TranscodeError::Media(other),
        }
    }
}

impl From<PayloadError> for TranscodeError {
    fn from(error: PayloadError) -> Self {
        if error.is_decompression() {
            TranscodeError::Decompression(error.to_string())
        } else {
            TranscodeError::Decryption(error.to_string())
        }
    }
}

impl TranscodeError {
    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    /// Stable identifier stored on failed rendition records.
    pub fn code(&self) -> &'static str {
        match self {
            TranscodeError::InvalidJob(_) => "invalid_job",
            TranscodeError::VideoNotFound(_) => "video_not_found",
            TranscodeError::ProfileNotFound(_) => "profile_not_found",
            TranscodeError::BucketNotFound(_) => "bucket_not_found",
            TranscodeError::FileNotFound(_) => "file_not_found",
            TranscodeError::Decryption(_) => "decryption_failed",
            TranscodeError::Decompression(_) => "decompression_failed",
            TranscodeError::InvalidMedia(_) => "invalid_source",
            TranscodeError::Probe(_) => "probe_failed",
            TranscodeError::Busy(_) => "busy",
            TranscodeError::Manifest(_) => "manifest_parse_failed",
            TranscodeError::NoArtifacts => "no_artifacts",
            TranscodeError::InvalidTransition { .. } => "invalid_transition",
            TranscodeError::Cancelled => "cancelled",
            TranscodeError::Media(MediaError::ProbeFailed { .. }) => "probe_failed",
            TranscodeError::Media(_) => "encode_failed",
            TranscodeError::Store(_) => "store_error",
            TranscodeError::Storage(_) => "upload_failed",
            TranscodeError::Lock(_) => "lock_error",
            TranscodeError::Io(_) => "io_error",
            TranscodeError::Json(_) => "serialization_error",
        }
    }

    /// Whether redelivering the job could succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TranscodeError::Busy(_)
                | TranscodeError::Store(StoreError::Database(_))
                | TranscodeError::Storage(StorageError::ReadFailed(_))
                | TranscodeError::Storage(StorageError::UploadFailed(_))
                | TranscodeError::Storage(StorageError::DeleteFailed(_))
                | TranscodeError::Lock(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(TranscodeError::InvalidMedia("x".into()).code(), "invalid_source");
        assert_eq!(TranscodeError::from(MediaError::Cancelled).code(), "cancelled");
        assert_eq!(
            TranscodeError::from(MediaError::encode_failed("boom", None, Some(1))).code(),
            "encode_failed"
        );
        assert_eq!(TranscodeError::NoArtifacts.code(), "no_artifacts");
    }

    #[test]
    fn test_retryable() {
        assert!(TranscodeError::Busy("r".into()).is_retryable());
        assert!(TranscodeError::Store(StoreError::Database("down".into())).is_retryable());
        assert!(!TranscodeError::VideoNotFound("v".into()).is_retryable());
        assert!(!TranscodeError::Storage(StorageError::not_found("p")).is_retryable());
        assert!(!TranscodeError::Cancelled.is_retryable());
    }

    #[test]
    fn test_invalid_media_message() {
        let err = TranscodeError::InvalidMedia("/tmp/in/a.mp4".into());
        assert!(err.to_string().starts_with("Not a valid media file"));
    }
}
