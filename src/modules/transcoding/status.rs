//! Sole writer of a job's `video_renditions` record.

use std::sync::Arc;

use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::debug;

use super::model::{RenditionStatus, VideoProfile, RENDITIONS};
use super::probe::MediaInfo;
use crate::error::{TranscodeError, TranscodeResult};
use crate::infrastructure::db::{Document, DocumentStore, ElevatedToken};

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub struct RenditionStatusManager {
    store: Arc<dyn DocumentStore>,
    elevated: ElevatedToken,
    record: Document,
    status: RenditionStatus,
    progress: Option<u8>,
}

impl RenditionStatusManager {
    /// Creates the record in `started`.
    pub async fn create(
        store: Arc<dyn DocumentStore>,
        elevated: ElevatedToken,
        video_id: &str,
        profile: &VideoProfile,
    ) -> TranscodeResult<Self> {
        let draft = Document::new("")
            .with("videoId", video_id)
            .with("profileId", profile.id.as_str())
            .with("name", profile.rendition_name())
            .with("startedAt", now())
            .with("status", RenditionStatus::Started.as_str())
            .with("stream", profile.stream_label());

        let record = store.create(elevated.into(), RENDITIONS, draft).await?;
        debug!(rendition_id = %record.id, "Rendition record created");

        Ok(Self {
            store,
            elevated,
            record,
            status: RenditionStatus::Started,
            progress: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn status(&self) -> RenditionStatus {
        self.status
    }

    pub fn record(&self) -> &Document {
        &self.record
    }

    pub fn path(&self) -> Option<&str> {
        self.record.get_str("path")
    }

    async fn persist(&mut self, next: Document) -> TranscodeResult<()> {
        self.record = self
            .store
            .update(self.elevated.into(), RENDITIONS, &next)
            .await?;
        Ok(())
    }

    async fn transition<F>(&mut self, to: RenditionStatus, apply: F) -> TranscodeResult<()>
    where
        F: FnOnce(&mut Document),
    {
        if !self.status.can_transition_to(to) {
            return Err(TranscodeError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        let mut next = self.record.clone();
        apply(&mut next);
        next.set("status", to.as_str());
        self.persist(next).await?;
        self.status = to;
        Ok(())
    }

    /// Writes `percentage` if it moves progress forward while encoding.
    /// Returns whether a write happened.
    pub async fn record_progress(&mut self, percentage: u8) -> TranscodeResult<bool> {
        let percentage = percentage.min(100);
        if self.status != RenditionStatus::Started
            || self.progress.is_some_and(|current| current >= percentage)
        {
            return Ok(false);
        }

        let mut next = self.record.clone();
        next.set("progress", percentage);
        self.persist(next).await?;
        self.progress = Some(percentage);
        Ok(true)
    }

    /// `started → ended`, merging output probe attributes and packaging metadata.
    pub async fn mark_encoded(
        &mut self,
        info: &MediaInfo,
        metadata: Option<Value>,
    ) -> TranscodeResult<()> {
        let info = info.to_value()?;
        self.transition(RenditionStatus::Ended, |doc| {
            doc.merge(info);
            if let Some(metadata) = metadata {
                doc.set("metadata", metadata);
            }
            doc.set("endedAt", now());
        })
        .await
    }

    pub async fn mark_uploading(&mut self, path: &str) -> TranscodeResult<()> {
        self.transition(RenditionStatus::Uploading, |doc| doc.set("path", path))
            .await
    }

    pub async fn mark_ready(&mut self) -> TranscodeResult<()> {
        self.transition(RenditionStatus::Ready, |_| {}).await
    }

    pub async fn mark_failed(&mut self, code: &str, message: &str) -> TranscodeResult<()> {
        self.transition(RenditionStatus::Error, |doc| {
            doc.set("metadata", json!({"code": code, "message": message}));
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::db::MemoryDocumentStore;
    use crate::modules::transcoding::model::Rendition;

    fn profile() -> VideoProfile {
        VideoProfile {
            id: "p720".into(),
            width: 1280,
            height: 720,
            video_bitrate: 2000,
            audio_bitrate: 128,
            stream: None,
        }
    }

    async fn manager(store: &Arc<MemoryDocumentStore>) -> RenditionStatusManager {
        RenditionStatusManager::create(store.clone(), ElevatedToken::system(), "v1", &profile())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut status = manager(&store).await;

        status.mark_encoded(&MediaInfo::default(), None).await.unwrap();
        status.mark_uploading("/videos/v1/1280X720@2128").await.unwrap();
        status.mark_ready().await.unwrap();

        let docs = store.documents(RENDITIONS);
        assert_eq!(docs.len(), 1);
        let rendition: Rendition = docs[0].to_typed().unwrap();
        assert_eq!(rendition.status, RenditionStatus::Ready);
        assert_eq!(rendition.name, "1280X720@2128");
        assert_eq!(rendition.path.as_deref(), Some("/videos/v1/1280X720@2128"));
        assert!(rendition.ended_at.is_some());
        assert!(store.journal().iter().all(|entry| entry.elevated));
    }

    #[tokio::test]
    async fn test_rejects_skipping_and_leaving_terminal() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut status = manager(&store).await;

        let err = status.mark_ready().await.unwrap_err();
        assert!(matches!(err, TranscodeError::InvalidTransition { .. }));

        status.mark_failed("encode_failed", "boom").await.unwrap();
        assert!(status.mark_uploading("/x").await.is_err());
        assert!(status.mark_failed("again", "again").await.is_err());

        let doc = &store.documents(RENDITIONS)[0];
        assert_eq!(doc.get_str("status"), Some("error"));
        assert_eq!(doc.get("metadata"), Some(&json!({"code": "encode_failed", "message": "boom"})));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_idempotent() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut status = manager(&store).await;

        assert!(status.record_progress(0).await.unwrap());
        assert!(!status.record_progress(0).await.unwrap());
        assert!(status.record_progress(30).await.unwrap());
        assert!(!status.record_progress(12).await.unwrap());
        assert!(status.record_progress(99).await.unwrap());

        status.mark_encoded(&MediaInfo::default(), None).await.unwrap();
        assert!(!status.record_progress(100).await.unwrap());

        let progress: Vec<i64> = store
            .writes_to(RENDITIONS)
            .iter()
            .filter_map(|entry| entry.document.get("progress").and_then(Value::as_i64))
            .collect();
        assert_eq!(progress, vec![0, 30, 99, 99]);
    }
}
