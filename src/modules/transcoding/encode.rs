use std::path::PathBuf;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::manifest::mpd_to_json;
use super::model::{PackagingMode, VideoProfile};
use super::probe::{probe_media, MediaInfo};
use super::status::RenditionStatusManager;
use super::workspace::Workspace;
use crate::error::{TranscodeError, TranscodeResult};
use crate::infrastructure::media::{
    progress_channel, EncodeOutput, EncodeRequest, MediaEngine, Packaging, Representation,
};

pub const SEGMENT_DURATION: u32 = 10;

/// Only every third percent reaches the record.
const PROGRESS_STEP: u8 = 3;
const PROGRESS_CAPACITY: usize = 16;

pub fn hls_base_url(public_endpoint: &str, video_id: &str, rendition_name: &str) -> String {
    format!(
        "{}/v1/video/{}/hls/{}/",
        public_endpoint.trim_end_matches('/'),
        video_id,
        rendition_name
    )
}

/// Scale to the profile width keeping aspect ratio with an even height,
/// square pixels, no data or subtitle streams.
pub fn additional_params(width: u32) -> Vec<String> {
    vec![
        "-dn".to_string(),
        "-sn".to_string(),
        "-vf".to_string(),
        format!("scale={}:-2,setsar=1:1", width),
    ]
}

#[derive(Debug, Clone)]
pub struct EncodePlan {
    pub request: EncodeRequest,
    pub mode: PackagingMode,
    pub rendition_name: String,
    pub width: u32,
    pub height: u32,
}

impl EncodePlan {
    pub fn new(
        profile: &VideoProfile,
        video_id: &str,
        source: PathBuf,
        workspace: &Workspace,
        public_endpoint: &str,
    ) -> Self {
        let rendition_name = profile.rendition_name();
        let mode = profile.packaging();
        let packaging = match mode {
            PackagingMode::Dash => Packaging::Dash,
            PackagingMode::Hls => Packaging::Hls {
                base_url: hls_base_url(public_endpoint, video_id, &rendition_name),
            },
        };

        Self {
            request: EncodeRequest {
                source,
                output_prefix: workspace.output_prefix(),
                representation: Representation {
                    video_kbps: profile.video_bitrate,
                    audio_kbps: profile.audio_bitrate,
                    width: profile.width,
                    height: profile.height,
                },
                packaging,
                segment_duration: SEGMENT_DURATION,
                additional_params: additional_params(profile.width),
            },
            mode,
            rendition_name,
            width: profile.width,
            height: profile.height,
        }
    }
}

/// Runs the engine, feeds progress into the record and closes the encode
/// stage with `ended`.
pub async fn run_encode(
    engine: &dyn MediaEngine,
    plan: &EncodePlan,
    status: &mut RenditionStatusManager,
    cancel: CancellationToken,
) -> TranscodeResult<EncodeOutput> {
    let (sink, progress) = progress_channel(PROGRESS_CAPACITY);

    let encode = engine.encode(&plan.request, sink, cancel);
    let drain = async {
        while let Ok(percentage) = progress.recv().await {
            if percentage % PROGRESS_STEP != 0 {
                continue;
            }
            if let Err(e) = status.record_progress(percentage).await {
                warn!(percentage, "Failed to record progress: {}", e);
            }
        }
    };

    let (result, ()) = tokio::join!(encode, drain);
    let output = result?;

    let mut info: MediaInfo = probe_media(engine, &output.probe_target).await?;
    info.width = i64::from(plan.width);
    info.height = i64::from(plan.height);

    let metadata = match plan.mode {
        PackagingMode::Dash => Some(dash_metadata(&output).await?),
        PackagingMode::Hls => None,
    };

    status.mark_encoded(&info, metadata).await?;
    info!(rendition = %plan.rendition_name, "🎬 Encode finished");
    Ok(output)
}

async fn dash_metadata(output: &EncodeOutput) -> TranscodeResult<Value> {
    let xml = tokio::fs::read_to_string(&output.manifest)
        .await
        .map_err(|e| TranscodeError::manifest(format!("{}: {}", output.manifest.display(), e)))?;
    Ok(json!({ "mpeg-dash": mpd_to_json(&xml)? }))
}
