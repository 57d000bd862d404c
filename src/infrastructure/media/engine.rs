//! Probe/encode capability consumed by the transcoding pipeline.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    BinaryNotFound(&'static str),

    #[error("Probe failed: {message}")]
    ProbeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Encode failed: {message}")]
    EncodeFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    pub fn encode_failed(message: impl Into<String>, stderr: Option<String>, exit_code: Option<i32>) -> Self {
        Self::EncodeFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }
}

/// One stream entry as reported by the probe, keyed like ffprobe output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stream(pub Map<String, Value>);

impl Stream {
    pub fn codec_type(&self) -> Option<&str> {
        self.get_str("codec_type")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Reads a property as text, whether it was reported as string or number.
    pub fn text(&self, key: &str) -> String {
        match self.0.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    /// Integer view of a property; unparseable or missing values become 0.
    pub fn int(&self, key: &str) -> i64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(0),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamCollection {
    pub streams: Vec<Stream>,
}

impl StreamCollection {
    pub fn new(streams: Vec<Stream>) -> Self {
        Self { streams }
    }

    pub fn videos(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter().filter(|s| s.codec_type() == Some("video"))
    }

    pub fn audios(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter().filter(|s| s.codec_type() == Some("audio"))
    }
}

/// Engine-level description of the single output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Representation {
    pub video_kbps: u32,
    pub audio_kbps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packaging {
    /// Segment references in the playlist are prefixed with `base_url`.
    Hls { base_url: String },
    Dash,
}

#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub source: PathBuf,
    /// Output files are named after this prefix (`{prefix}.m3u8`, `{prefix}.mpd`, ...).
    pub output_prefix: PathBuf,
    pub representation: Representation,
    pub packaging: Packaging,
    pub segment_duration: u32,
    pub additional_params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOutput {
    /// Top-level manifest (`.m3u8` master or `.mpd`).
    pub manifest: PathBuf,
    /// File the output-side probe should inspect.
    pub probe_target: PathBuf,
}

/// Sending half of the bounded progress queue handed to the engine.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: async_channel::Sender<u8>,
}

impl ProgressSink {
    /// Reports a percentage, clamped to 100. Delivery stops silently once
    /// the receiving side is gone.
    pub async fn report(&self, percentage: u8) {
        let _ = self.tx.send(percentage.min(100)).await;
    }

    /// Non-blocking variant for engines that report from a synchronous context.
    pub fn try_report(&self, percentage: u8) -> bool {
        self.tx.try_send(percentage.min(100)).is_ok()
    }
}

pub fn progress_channel(capacity: usize) -> (ProgressSink, async_channel::Receiver<u8>) {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    (ProgressSink { tx }, rx)
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn probe(&self, path: &Path) -> MediaResult<StreamCollection>;

    /// Whether the file is decodable media at all.
    async fn is_valid(&self, path: &Path) -> bool;

    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> MediaResult<EncodeOutput>;
}
