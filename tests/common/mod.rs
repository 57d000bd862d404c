#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use rendition_worker::config::keys::KeyRing;
use rendition_worker::infrastructure::db::{Document, MemoryDocumentStore};
use rendition_worker::infrastructure::media::{
    EncodeOutput, EncodeRequest, MediaEngine, MediaError, MediaResult, Packaging, ProgressSink,
    Stream, StreamCollection,
};
use rendition_worker::infrastructure::redis::LocalLease;
use rendition_worker::infrastructure::storage::{LocalDevice, StorageDevice};
use rendition_worker::modules::transcoding::model::{
    BUCKETS, RENDITIONS, VIDEOS, VIDEO_PROFILES,
};
use rendition_worker::modules::transcoding::{PipelineSettings, TranscodeDeps, TranscodeJob};

pub const MEDIA_MAGIC: &[u8] = b"FAKEMEDIA";
pub const PROJECT: &str = "console";
pub const VIDEO: &str = "v1";
pub const PROFILE: &str = "p720";
pub const BUCKET: &str = "b1";
pub const FILE: &str = "f1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeBehavior {
    Succeed,
    Fail,
    WaitForCancel,
}

/// Engine double: accepts files starting with `FAKEMEDIA`, reports every
/// percentage from 0 to 100 and writes a small set of output files.
pub struct MockEngine {
    behavior: EncodeBehavior,
    requests: Mutex<Vec<EncodeRequest>>,
}

impl MockEngine {
    pub fn new(behavior: EncodeBehavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<EncodeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn canned_streams() -> StreamCollection {
    let streams = [
        json!({
            "codec_type": "video",
            "codec_name": "h264",
            "codec_tag_string": "avc1",
            "width": 1920,
            "height": 1080,
            "avg_frame_rate": "25/1",
            "bit_rate": "4000000",
            "duration": "12.000000"
        }),
        json!({
            "codec_type": "audio",
            "codec_name": "aac",
            "codec_tag_string": "mp4a",
            "sample_rate": "48000",
            "bit_rate": "128000",
            "duration": "12.000000"
        }),
    ];
    StreamCollection::new(
        streams
            .into_iter()
            .map(|s| serde_json::from_value::<Stream>(s).unwrap())
            .collect(),
    )
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{}", prefix.display(), suffix))
}

pub const MPD: &str = r#"<?xml version="1.0"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT12.0S">
  <Period id="0">
    <AdaptationSet id="0" contentType="video">
      <Representation id="0" bandwidth="2000000" width="1280" height="720"/>
    </AdaptationSet>
    <AdaptationSet id="1" contentType="audio">
      <Representation id="1" bandwidth="128000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

#[async_trait]
impl MediaEngine for MockEngine {
    async fn probe(&self, path: &Path) -> MediaResult<StreamCollection> {
        if tokio::fs::try_exists(path).await? {
            Ok(canned_streams())
        } else {
            Err(MediaError::ProbeFailed {
                message: format!("missing {}", path.display()),
                stderr: None,
            })
        }
    }

    async fn is_valid(&self, path: &Path) -> bool {
        tokio::fs::read(path)
            .await
            .map(|data| data.starts_with(MEDIA_MAGIC))
            .unwrap_or(false)
    }

    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> MediaResult<EncodeOutput> {
        self.requests.lock().unwrap().push(request.clone());

        match self.behavior {
            EncodeBehavior::Fail => {
                progress.report(0).await;
                progress.report(3).await;
                return Err(MediaError::encode_failed("mock encoder exploded", None, Some(1)));
            }
            EncodeBehavior::WaitForCancel => {
                progress.report(0).await;
                cancel.cancelled().await;
                return Err(MediaError::Cancelled);
            }
            EncodeBehavior::Succeed => {}
        }

        for pct in 0..=100u8 {
            progress.report(pct).await;
        }

        let prefix = &request.output_prefix;
        let height = request.representation.height;
        match &request.packaging {
            Packaging::Hls { base_url } => {
                let variant = with_suffix(prefix, &format!("_{height}p.m3u8"));
                let segment = format!("{base_url}{}", with_suffix(prefix, &format!("_{height}p_0000.ts")).file_name().unwrap().to_string_lossy());
                tokio::fs::write(&variant, format!("#EXTM3U\n#EXTINF:10.0,\n{segment}\n")).await?;
                tokio::fs::write(with_suffix(prefix, &format!("_{height}p_0000.ts")), b"ts0").await?;
                tokio::fs::write(with_suffix(prefix, &format!("_{height}p_0001.ts")), b"ts1").await?;
                tokio::fs::write(with_suffix(prefix, "-meta.json"), b"{}").await?;
                let master = with_suffix(prefix, ".m3u8");
                tokio::fs::write(&master, b"#EXTM3U\n").await?;
                Ok(EncodeOutput {
                    manifest: master,
                    probe_target: variant,
                })
            }
            Packaging::Dash => {
                let manifest = with_suffix(prefix, ".mpd");
                tokio::fs::write(&manifest, MPD).await?;
                tokio::fs::write(with_suffix(prefix, "_init_0.m4s"), b"init").await?;
                tokio::fs::write(with_suffix(prefix, "_chunk_0_00001.m4s"), b"chunk").await?;
                Ok(EncodeOutput {
                    manifest: manifest.clone(),
                    probe_target: manifest,
                })
            }
        }
    }
}

/// In-memory tenant with local devices under a temp dir.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<MemoryDocumentStore>,
    pub files: Arc<LocalDevice>,
    pub videos: Arc<LocalDevice>,
    pub engine: Arc<MockEngine>,
    pub lock: Arc<LocalLease>,
    pub keys: KeyRing,
}

impl Harness {
    pub fn new(behavior: EncodeBehavior) -> Self {
        let dir = TempDir::new().unwrap();
        let files = Arc::new(LocalDevice::new(dir.path().join("uploads/app-console")));
        let videos = Arc::new(LocalDevice::new(dir.path().join("videos/app-console")));

        Self {
            store: Arc::new(MemoryDocumentStore::new()),
            files,
            videos,
            engine: Arc::new(MockEngine::new(behavior)),
            lock: Arc::new(LocalLease::new()),
            keys: KeyRing::new(),
            dir,
        }
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn deps(&self) -> TranscodeDeps {
        TranscodeDeps {
            store: self.store.clone(),
            files: self.files.clone(),
            videos: self.videos.clone(),
            engine: self.engine.clone(),
            lock: self.lock.clone(),
            keys: self.keys.clone(),
            settings: PipelineSettings {
                workspace_root: self.workspace_root(),
                public_endpoint: "http://127.0.0.1".to_string(),
                lease_ttl: Duration::from_secs(60),
                keep_workspace: false,
            },
        }
    }

    pub fn job(&self) -> TranscodeJob {
        TranscodeJob::new(PROJECT, VIDEO, PROFILE)
    }

    pub fn seed_profile(&self, stream: &str) {
        self.store.seed(
            VIDEO_PROFILES,
            Document::new(PROFILE)
                .with("width", 1280)
                .with("height", 720)
                .with("videoBitrate", 2000)
                .with("audioBitrate", 128)
                .with("stream", stream),
        );
    }

    pub fn source_path(&self) -> String {
        self.files.get_path("f1/movie.mp4")
    }

    /// Seeds bucket, file record and video and stores `data` as the upload.
    pub async fn seed_source(&self, data: Vec<u8>, file_attributes: Value) {
        self.store.seed(
            BUCKETS,
            Document::new(BUCKET)
                .with("$internalId", "1")
                .with("permission", "bucket"),
        );

        let mut file = Document::new(FILE)
            .with("path", self.source_path())
            .with("mimeType", "video/mp4");
        file.merge(file_attributes);
        self.store.seed("bucket_1", file);

        self.store.seed(
            VIDEOS,
            Document::new(VIDEO)
                .with("bucketId", BUCKET)
                .with("fileId", FILE),
        );

        self.files
            .write(&self.source_path(), data, "video/mp4")
            .await
            .unwrap();
    }

    pub async fn seed_default(&self) {
        self.seed_profile("hls");
        self.seed_source(fake_media(), json!({})).await;
    }

    pub fn rendition_path(&self) -> String {
        format!("{}/1280X720@2128", self.videos.get_path(VIDEO))
    }

    pub fn renditions(&self) -> Vec<Document> {
        self.store.documents(RENDITIONS)
    }
}

pub fn fake_media() -> Vec<u8> {
    let mut data = MEDIA_MAGIC.to_vec();
    data.extend_from_slice(&[0u8; 256]);
    data
}
