//! `MediaEngine` backed by the ffmpeg/ffprobe binaries.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{
    EncodeOutput, EncodeRequest, MediaEngine, MediaError, MediaResult, Packaging, ProgressSink,
    Stream, StreamCollection,
};

const STDERR_TAIL: usize = 20;

const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<Stream>,
    #[serde(default)]
    format: Option<Map<String, Value>>,
}

#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegEngine {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Locates both binaries on `PATH`.
    pub fn discover() -> MediaResult<Self> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| MediaError::BinaryNotFound("ffmpeg"))?;
        let ffprobe = which::which("ffprobe").map_err(|_| MediaError::BinaryNotFound("ffprobe"))?;
        info!(ffmpeg = %ffmpeg.display(), ffprobe = %ffprobe.display(), "Using ffmpeg engine");
        Ok(Self::new(ffmpeg, ffprobe))
    }

    async fn run_probe(&self, path: &Path) -> MediaResult<FfprobeOutput> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(MediaError::ProbeFailed {
                message: format!("ffprobe rejected {}", path.display()),
                stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn source_duration_us(&self, path: &Path) -> u64 {
        match self.run_probe(path).await {
            Ok(probe) => {
                let collection = with_format_duration(probe);
                collection
                    .videos()
                    .next()
                    .and_then(|video| video.text("duration").parse::<f64>().ok())
                    .map(|seconds| (seconds * 1_000_000.0) as u64)
                    .unwrap_or(0)
            }
            Err(e) => {
                warn!("Could not read source duration, progress disabled: {}", e);
                0
            }
        }
    }
}

/// Streams from containers like HLS often lack a per-stream duration; fall
/// back to the container's.
fn with_format_duration(probe: FfprobeOutput) -> StreamCollection {
    let format_duration = probe
        .format
        .as_ref()
        .and_then(|format| format.get("duration"))
        .cloned();

    let streams = probe
        .streams
        .into_iter()
        .map(|mut stream| {
            if stream.get("duration").is_none() {
                if let Some(duration) = &format_duration {
                    stream.0.insert("duration".to_string(), duration.clone());
                }
            }
            stream
        })
        .collect();

    StreamCollection::new(streams)
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Builds the ffmpeg argument list and the paths the run will produce.
pub fn build_encode_args(request: &EncodeRequest) -> (Vec<String>, EncodeOutput) {
    let rep = &request.representation;
    let prefix = &request.output_prefix;

    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-nostats".into(),
        "-v".into(),
        "error".into(),
        "-progress".into(),
        "pipe:2".into(),
        "-i".into(),
        request.source.to_string_lossy().to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-b:v".into(),
        format!("{}k", rep.video_kbps),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        format!("{}k", rep.audio_kbps),
    ];
    args.extend(request.additional_params.iter().cloned());

    let segment = request.segment_duration.to_string();
    match &request.packaging {
        Packaging::Hls { base_url } => {
            let variant = with_suffix(prefix, &format!("_{}p.m3u8", rep.height));
            let segments = with_suffix(prefix, &format!("_{}p_%04d.ts", rep.height));
            args.extend([
                "-f".into(),
                "hls".into(),
                "-hls_time".into(),
                segment,
                "-hls_playlist_type".into(),
                "vod".into(),
                "-hls_list_size".into(),
                "0".into(),
                "-hls_segment_filename".into(),
                segments.to_string_lossy().to_string(),
                "-hls_base_url".into(),
                base_url.clone(),
                variant.to_string_lossy().to_string(),
            ]);
            (
                args,
                EncodeOutput {
                    manifest: with_suffix(prefix, ".m3u8"),
                    probe_target: variant,
                },
            )
        }
        Packaging::Dash => {
            let manifest = with_suffix(prefix, ".mpd");
            let stem = prefix
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            args.extend([
                "-f".into(),
                "dash".into(),
                "-seg_duration".into(),
                segment,
                "-use_template".into(),
                "1".into(),
                "-use_timeline".into(),
                "1".into(),
                "-init_seg_name".into(),
                format!("{}_init_$RepresentationID$.m4s", stem),
                "-media_seg_name".into(),
                format!("{}_chunk_$RepresentationID$_$Number%05d$.m4s", stem),
                manifest.to_string_lossy().to_string(),
            ]);
            (
                args,
                EncodeOutput {
                    manifest: manifest.clone(),
                    probe_target: manifest,
                },
            )
        }
    }
}

fn master_playlist(request: &EncodeRequest, variant: &Path) -> String {
    let rep = &request.representation;
    let bandwidth = (u64::from(rep.video_kbps) + u64::from(rep.audio_kbps)) * 1000;
    let variant_name = variant
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n{}\n",
        bandwidth, rep.width, rep.height, variant_name
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProgressLine {
    Position(u64),
    End,
}

fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        // ffmpeg reports microseconds under both keys.
        "out_time_us" | "out_time_ms" => value.parse::<u64>().ok().map(ProgressLine::Position),
        "progress" if value == "end" => Some(ProgressLine::End),
        _ => None,
    }
}

fn is_progress_line(line: &str) -> bool {
    line.split_once('=')
        .map(|(key, _)| PROGRESS_KEYS.contains(&key) || key.starts_with("stream_"))
        .unwrap_or(false)
}

/// Percentage of the source encoded so far. 100 is reserved for the end marker.
fn percentage(position_us: u64, total_us: u64) -> Option<u8> {
    if total_us == 0 {
        return None;
    }
    let pct = position_us.saturating_mul(100) / total_us;
    Some(pct.min(99) as u8)
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn probe(&self, path: &Path) -> MediaResult<StreamCollection> {
        Ok(with_format_duration(self.run_probe(path).await?))
    }

    async fn is_valid(&self, path: &Path) -> bool {
        match self.run_probe(path).await {
            Ok(probe) => !probe.streams.is_empty(),
            Err(e) => {
                debug!("ffprobe validation failed for {}: {}", path.display(), e);
                false
            }
        }
    }

    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> MediaResult<EncodeOutput> {
        let total_us = self.source_duration_us(&request.source).await;
        let (args, output) = build_encode_args(request);
        debug!("Running ffmpeg {}", args.join(" "));

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::encode_failed("ffmpeg stderr not captured", None, None))?;

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);
            let mut last: Option<u8> = None;

            while let Ok(Some(line)) = lines.next_line().await {
                let pct = match parse_progress_line(&line) {
                    Some(ProgressLine::Position(us)) => percentage(us, total_us),
                    Some(ProgressLine::End) => Some(100),
                    None => {
                        if !is_progress_line(&line) && !line.trim().is_empty() {
                            if tail.len() == STDERR_TAIL {
                                tail.pop_front();
                            }
                            tail.push_back(line);
                        }
                        None
                    }
                };

                if let Some(pct) = pct {
                    if last.is_none_or(|previous| pct > previous) {
                        progress.report(pct).await;
                        last = Some(pct);
                    }
                }
            }

            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let finished = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let status = match finished {
            Some(status) => status?,
            None => {
                info!("Encode cancelled, killing ffmpeg");
                let _ = child.kill().await;
                let _ = reader.await;
                return Err(MediaError::Cancelled);
            }
        };

        let stderr_tail = reader.await.unwrap_or_default();
        if !status.success() {
            return Err(MediaError::encode_failed(
                "ffmpeg exited with non-zero status",
                (!stderr_tail.is_empty()).then_some(stderr_tail),
                status.code(),
            ));
        }

        if matches!(request.packaging, Packaging::Hls { .. }) {
            tokio::fs::write(&output.manifest, master_playlist(request, &output.probe_target))
                .await?;
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::media::engine::Representation;
    use serde_json::json;

    fn request(packaging: Packaging) -> EncodeRequest {
        EncodeRequest {
            source: PathBuf::from("/work/v1/p1/in/source.mp4"),
            output_prefix: PathBuf::from("/work/v1/p1/out/v1"),
            representation: Representation {
                video_kbps: 2000,
                audio_kbps: 128,
                width: 1280,
                height: 720,
            },
            packaging,
            segment_duration: 10,
            additional_params: vec!["-dn".into(), "-sn".into()],
        }
    }

    #[test]
    fn test_hls_args() {
        let req = request(Packaging::Hls {
            base_url: "http://cdn/v1/video/v1/hls/1280X720@2128/".into(),
        });
        let (args, output) = build_encode_args(&req);

        assert!(args.windows(2).any(|w| w == ["-b:v", "2000k"]));
        assert!(args.windows(2).any(|w| w == ["-b:a", "128k"]));
        assert!(args.windows(2).any(|w| w == ["-hls_time", "10"]));
        assert!(args.windows(2).any(|w| w[0] == "-hls_base_url" && w[1].ends_with("1280X720@2128/")));
        assert!(args.contains(&"-dn".to_string()));
        assert_eq!(output.manifest, PathBuf::from("/work/v1/p1/out/v1.m3u8"));
        assert_eq!(output.probe_target, PathBuf::from("/work/v1/p1/out/v1_720p.m3u8"));
        assert_eq!(args.last().unwrap(), "/work/v1/p1/out/v1_720p.m3u8");
    }

    #[test]
    fn test_dash_args() {
        let (args, output) = build_encode_args(&request(Packaging::Dash));

        assert!(args.windows(2).any(|w| w == ["-f", "dash"]));
        assert!(args.windows(2).any(|w| w == ["-seg_duration", "10"]));
        assert!(args.iter().any(|a| a.starts_with("v1_init_")));
        assert_eq!(output.manifest, PathBuf::from("/work/v1/p1/out/v1.mpd"));
        assert_eq!(output.manifest, output.probe_target);
    }

    #[test]
    fn test_master_playlist() {
        let req = request(Packaging::Hls { base_url: String::new() });
        let playlist = master_playlist(&req, Path::new("/work/v1/p1/out/v1_720p.m3u8"));
        assert!(playlist.starts_with("#EXTM3U\n"));
        assert!(playlist.contains("BANDWIDTH=2128000,RESOLUTION=1280x720"));
        assert!(playlist.trim_end().ends_with("v1_720p.m3u8"));
    }

    #[test]
    fn test_progress_parsing() {
        assert_eq!(parse_progress_line("out_time_us=5000000"), Some(ProgressLine::Position(5_000_000)));
        assert_eq!(parse_progress_line("out_time_ms=7"), Some(ProgressLine::Position(7)));
        assert_eq!(parse_progress_line("progress=end"), Some(ProgressLine::End));
        assert_eq!(parse_progress_line("progress=continue"), None);
        assert_eq!(parse_progress_line("out_time_us=N/A"), None);
        assert_eq!(parse_progress_line("Error opening input"), None);

        assert!(is_progress_line("speed=1.5x"));
        assert!(is_progress_line("stream_0_0_q=28.0"));
        assert!(!is_progress_line("Invalid data found when processing input"));
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(5_000_000, 10_000_000), Some(50));
        assert_eq!(percentage(12_000_000, 10_000_000), Some(99));
        assert_eq!(percentage(0, 10_000_000), Some(0));
        assert_eq!(percentage(1, 0), None);
    }

    #[test]
    fn test_format_duration_fallback() {
        let probe: FfprobeOutput = serde_json::from_value(json!({
            "streams": [
                {"codec_type": "video"},
                {"codec_type": "audio", "duration": "9.5"}
            ],
            "format": {"duration": "10.0"}
        }))
        .unwrap();

        let collection = with_format_duration(probe);
        assert_eq!(collection.videos().next().unwrap().text("duration"), "10.0");
        assert_eq!(collection.audios().next().unwrap().text("duration"), "9.5");
    }
}
