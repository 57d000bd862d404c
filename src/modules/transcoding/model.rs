use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::probe::MediaInfo;

pub const VIDEOS: &str = "videos";
pub const VIDEO_PROFILES: &str = "video_profiles";
pub const RENDITIONS: &str = "video_renditions";
pub const BUCKETS: &str = "buckets";

/// Bucket-scoped permission: file records are read with elevated access.
pub const BUCKET_PERMISSION: &str = "bucket";

pub fn bucket_collection(internal_id: &str) -> String {
    format!("bucket_{}", internal_id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceVideo {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "bucketId")]
    pub bucket_id: String,
    #[serde(rename = "fileId")]
    pub file_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackagingMode {
    #[default]
    #[serde(rename = "hls")]
    Hls,
    #[serde(rename = "mpeg-dash")]
    Dash,
}

impl PackagingMode {
    /// Unknown modes fall back to HLS.
    pub fn parse(value: &str) -> Self {
        match value {
            "mpeg-dash" | "dash" => PackagingMode::Dash,
            _ => PackagingMode::Hls,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PackagingMode::Hls => "hls",
            PackagingMode::Dash => "mpeg-dash",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoProfile {
    #[serde(rename = "$id")]
    pub id: String,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "videoBitrate")]
    pub video_bitrate: u32,
    #[serde(rename = "audioBitrate")]
    pub audio_bitrate: u32,
    /// Stored as given on the profile; see [`VideoProfile::packaging`].
    #[serde(default)]
    pub stream: Option<String>,
}

impl VideoProfile {
    pub fn packaging(&self) -> PackagingMode {
        self.stream
            .as_deref()
            .map(PackagingMode::parse)
            .unwrap_or_default()
    }

    /// Value copied onto the rendition record. Missing means HLS.
    pub fn stream_label(&self) -> &str {
        self.stream
            .as_deref()
            .unwrap_or(PackagingMode::Hls.as_str())
    }

    /// `{width}X{height}@{total kbps}`, e.g. `1280X720@2128`.
    pub fn rendition_name(&self) -> String {
        format!(
            "{}X{}@{}",
            self.width,
            self.height,
            u64::from(self.video_bitrate) + u64::from(self.audio_bitrate)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "$internalId")]
    pub internal_id: String,
    #[serde(default)]
    pub permission: String,
}

impl Bucket {
    pub fn is_bucket_scoped(&self) -> bool {
        self.permission == BUCKET_PERMISSION
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(rename = "$id", default)]
    pub id: String,
    pub path: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
    #[serde(rename = "openSSLCipher", default)]
    pub cipher: Option<String>,
    #[serde(rename = "openSSLVersion", default)]
    pub key_version: Option<String>,
    #[serde(rename = "openSSLIV", default)]
    pub iv: Option<String>,
    #[serde(rename = "openSSLTag", default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
}

impl FileRecord {
    pub fn is_encrypted(&self) -> bool {
        self.cipher.as_deref().is_some_and(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenditionStatus {
    Started,
    Ended,
    Uploading,
    Ready,
    Error,
}

impl RenditionStatus {
    fn rank(&self) -> u8 {
        match self {
            RenditionStatus::Started => 0,
            RenditionStatus::Ended => 1,
            RenditionStatus::Uploading => 2,
            RenditionStatus::Ready => 3,
            RenditionStatus::Error => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RenditionStatus::Ready | RenditionStatus::Error)
    }

    /// Forward along `started → ended → uploading → ready`, or into `error`
    /// from any non-terminal stage.
    pub fn can_transition_to(&self, next: RenditionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == RenditionStatus::Error || next.rank() == self.rank() + 1
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RenditionStatus::Started => "started",
            RenditionStatus::Ended => "ended",
            RenditionStatus::Uploading => "uploading",
            RenditionStatus::Ready => "ready",
            RenditionStatus::Error => "error",
        }
    }
}

impl fmt::Display for RenditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view of a `video_renditions` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rendition {
    #[serde(rename = "$id", default)]
    pub id: String,
    #[serde(rename = "videoId")]
    pub video_id: String,
    #[serde(rename = "profileId")]
    pub profile_id: String,
    pub name: String,
    pub status: RenditionStatus,
    #[serde(default)]
    pub stream: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(rename = "startedAt")]
    pub started_at: i64,
    #[serde(rename = "endedAt", default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub info: Option<MediaInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rendition_name() {
        let profile: VideoProfile = serde_json::from_value(json!({
            "$id": "p720",
            "width": 1280,
            "height": 720,
            "videoBitrate": 2000,
            "audioBitrate": 128
        }))
        .unwrap();

        assert_eq!(profile.rendition_name(), "1280X720@2128");
        assert_eq!(profile.packaging(), PackagingMode::Hls);
        assert_eq!(profile.stream_label(), "hls");
    }

    #[test]
    fn test_packaging_mode_parsing() {
        assert_eq!(PackagingMode::parse("mpeg-dash"), PackagingMode::Dash);
        assert_eq!(PackagingMode::parse("dash"), PackagingMode::Dash);
        assert_eq!(PackagingMode::parse("hls"), PackagingMode::Hls);
        assert_eq!(PackagingMode::parse("smooth"), PackagingMode::Hls);

        let profile: VideoProfile = serde_json::from_value(json!({
            "$id": "p", "width": 1, "height": 1, "videoBitrate": 1, "audioBitrate": 1,
            "stream": "dash"
        }))
        .unwrap();
        assert_eq!(profile.packaging(), PackagingMode::Dash);
        assert_eq!(profile.stream_label(), "dash");

        let odd: VideoProfile = serde_json::from_value(json!({
            "$id": "p", "width": 1, "height": 1, "videoBitrate": 1, "audioBitrate": 1,
            "stream": "smooth"
        }))
        .unwrap();
        assert_eq!(odd.packaging(), PackagingMode::Hls);
        assert_eq!(odd.stream_label(), "smooth");
    }

    #[test]
    fn test_status_transitions() {
        use RenditionStatus::*;

        assert!(Started.can_transition_to(Ended));
        assert!(Ended.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Ready));
        assert!(Started.can_transition_to(Error));
        assert!(Uploading.can_transition_to(Error));

        assert!(!Started.can_transition_to(Ready));
        assert!(!Ended.can_transition_to(Started));
        assert!(!Ready.can_transition_to(Error));
        assert!(!Error.can_transition_to(Started));
        assert!(!Started.can_transition_to(Started));
    }

    #[test]
    fn test_file_record_encryption_flag() {
        let plain: FileRecord = serde_json::from_value(json!({"path": "/a", "openSSLCipher": ""})).unwrap();
        assert!(!plain.is_encrypted());

        let sealed: FileRecord =
            serde_json::from_value(json!({"path": "/a", "openSSLCipher": "aes-128-gcm"})).unwrap();
        assert!(sealed.is_encrypted());
    }

    #[test]
    fn test_rendition_without_media_info() {
        let rendition: Rendition = serde_json::from_value(json!({
            "$id": "r1",
            "videoId": "v1",
            "profileId": "p1",
            "name": "1280X720@2128",
            "status": "started",
            "stream": "hls",
            "startedAt": 1700000000
        }))
        .unwrap();

        assert_eq!(rendition.status, RenditionStatus::Started);
        assert!(rendition.info.is_none());
        assert!(rendition.path.is_none());
    }
}
