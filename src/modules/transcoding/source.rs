//! Turns a stored upload into a plaintext media file inside the workspace.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use super::model::{bucket_collection, Bucket, FileRecord, SourceVideo, BUCKETS};
use super::payload::{self, Cipher};
use super::workspace::Workspace;
use crate::config::keys::KeyRing;
use crate::error::{TranscodeError, TranscodeResult};
use crate::infrastructure::db::{Authorization, DocumentStore, ElevatedToken};
use crate::infrastructure::media::MediaEngine;
use crate::infrastructure::storage::{StorageDevice, StorageError};

pub struct SourceResolver {
    store: Arc<dyn DocumentStore>,
    files: Arc<dyn StorageDevice>,
    engine: Arc<dyn MediaEngine>,
    keys: KeyRing,
    elevated: ElevatedToken,
}

impl SourceResolver {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        files: Arc<dyn StorageDevice>,
        engine: Arc<dyn MediaEngine>,
        keys: KeyRing,
        elevated: ElevatedToken,
    ) -> Self {
        Self {
            store,
            files,
            engine,
            keys,
            elevated,
        }
    }

    async fn file_record(&self, video: &SourceVideo) -> TranscodeResult<FileRecord> {
        let bucket: Bucket = self
            .store
            .get(self.elevated.into(), BUCKETS, &video.bucket_id)
            .await?
            .ok_or_else(|| TranscodeError::BucketNotFound(video.bucket_id.clone()))?
            .to_typed()?;

        let auth = if bucket.is_bucket_scoped() {
            Authorization::from(self.elevated)
        } else {
            Authorization::Caller
        };

        self.store
            .get(auth, &bucket_collection(&bucket.internal_id), &video.file_id)
            .await?
            .ok_or_else(|| TranscodeError::FileNotFound(video.file_id.clone()))?
            .to_typed()
            .map_err(TranscodeError::from)
    }

    fn decrypt(&self, file: &FileRecord, data: &[u8]) -> TranscodeResult<Vec<u8>> {
        let cipher = Cipher::parse(file.cipher.as_deref().unwrap_or_default())?;
        let version = file.key_version.clone().unwrap_or_default();
        let secret = self
            .keys
            .get(&version)
            .ok_or(payload::PayloadError::UnknownKeyVersion(version))?;

        Ok(payload::decrypt(
            cipher,
            secret.as_bytes(),
            file.iv.as_deref().unwrap_or_default(),
            file.tag.as_deref().unwrap_or_default(),
            data,
        )?)
    }

    /// Fetches, decrypts, decompresses and validates the source. Returns the
    /// path of the plaintext copy inside the workspace.
    pub async fn materialize(
        &self,
        video: &SourceVideo,
        workspace: &Workspace,
    ) -> TranscodeResult<PathBuf> {
        let file = self.file_record(video).await?;

        let mut data = self.files.read(&file.path).await.map_err(|e| match e {
            StorageError::NotFound(path) => TranscodeError::FileNotFound(path),
            other => TranscodeError::Storage(other),
        })?;
        debug!(bytes = data.len(), path = %file.path, "Source downloaded");

        if file.is_encrypted() {
            data = self.decrypt(&file, &data)?;
        }

        if payload::is_compressed(file.algorithm.as_deref()) {
            data = payload::decompress(file.algorithm.as_deref().unwrap_or_default(), &data)?;
        }

        let input = workspace.input_path(&file.path);
        tokio::fs::write(&input, &data).await?;

        if !self.engine.is_valid(&input).await {
            return Err(TranscodeError::InvalidMedia(input.display().to_string()));
        }

        info!(video_id = %video.id, "⬇️ Source ready ({} bytes)", data.len());
        Ok(input)
    }
}
