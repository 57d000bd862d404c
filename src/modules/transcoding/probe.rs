use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{TranscodeError, TranscodeResult};
use crate::infrastructure::media::{MediaEngine, MediaError, StreamCollection};

/// Technical attributes written onto source videos and rendition records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: String,
    pub width: i64,
    pub height: i64,
    #[serde(rename = "videoCodec")]
    pub video_codec: String,
    #[serde(rename = "videoFramerate")]
    pub video_framerate: String,
    #[serde(rename = "videoBitrate")]
    pub video_bitrate: i64,
    #[serde(rename = "audioCodec")]
    pub audio_codec: String,
    #[serde(rename = "audioSamplerate")]
    pub audio_samplerate: i64,
    #[serde(rename = "audioBitrate")]
    pub audio_bitrate: i64,
}

impl MediaInfo {
    /// Uses the first video and first audio stream; both must exist.
    pub fn from_streams(streams: &StreamCollection) -> TranscodeResult<Self> {
        let video = streams
            .videos()
            .next()
            .ok_or_else(|| TranscodeError::probe("no video stream"))?;
        let audio = streams
            .audios()
            .next()
            .ok_or_else(|| TranscodeError::probe("no audio stream"))?;

        Ok(Self {
            duration: video.text("duration"),
            width: video.int("width"),
            height: video.int("height"),
            video_codec: format!(
                "{},{}",
                video.text("codec_name"),
                video.text("codec_tag_string")
            ),
            video_framerate: video.text("avg_frame_rate"),
            video_bitrate: video.int("bit_rate"),
            audio_codec: format!(
                "{},{}",
                audio.text("codec_name"),
                audio.text("codec_tag_string")
            ),
            audio_samplerate: audio.int("sample_rate"),
            audio_bitrate: audio.int("bit_rate"),
        })
    }

    pub fn to_value(&self) -> TranscodeResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

pub async fn probe_media(engine: &dyn MediaEngine, path: &Path) -> TranscodeResult<MediaInfo> {
    let streams = engine.probe(path).await.map_err(|e| match e {
        MediaError::Cancelled => TranscodeError::Cancelled,
        other => TranscodeError::probe(other.to_string()),
    })?;
    MediaInfo::from_streams(&streams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::media::Stream;
    use serde_json::json;

    fn streams(values: Vec<Value>) -> StreamCollection {
        StreamCollection::new(
            values
                .into_iter()
                .map(|v| serde_json::from_value::<Stream>(v).unwrap())
                .collect(),
        )
    }

    #[test]
    fn test_extracts_first_video_and_audio() {
        let info = MediaInfo::from_streams(&streams(vec![
            json!({
                "codec_type": "audio",
                "codec_name": "aac",
                "codec_tag_string": "mp4a",
                "sample_rate": "48000",
                "bit_rate": "128000"
            }),
            json!({
                "codec_type": "video",
                "codec_name": "h264",
                "codec_tag_string": "avc1",
                "width": 1920,
                "height": 1080,
                "avg_frame_rate": "30000/1001",
                "bit_rate": "4500000",
                "duration": "12.345"
            }),
            json!({"codec_type": "audio", "codec_name": "opus"}),
        ]))
        .unwrap();

        assert_eq!(info.duration, "12.345");
        assert_eq!(info.width, 1920);
        assert_eq!(info.video_codec, "h264,avc1");
        assert_eq!(info.video_framerate, "30000/1001");
        assert_eq!(info.video_bitrate, 4_500_000);
        assert_eq!(info.audio_codec, "aac,mp4a");
        assert_eq!(info.audio_samplerate, 48000);
        assert_eq!(info.audio_bitrate, 128000);
    }

    #[test]
    fn test_missing_audio_is_probe_error() {
        let err = MediaInfo::from_streams(&streams(vec![json!({"codec_type": "video"})]))
            .unwrap_err();
        assert_eq!(err.code(), "probe_failed");
    }

    #[test]
    fn test_serialized_keys() {
        let value = MediaInfo::default().to_value().unwrap();
        for key in [
            "duration",
            "width",
            "height",
            "videoCodec",
            "videoFramerate",
            "videoBitrate",
            "audioCodec",
            "audioSamplerate",
            "audioBitrate",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }
}
