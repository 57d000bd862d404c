pub mod engine;
pub mod ffmpeg;

pub use engine::{
    progress_channel, EncodeOutput, EncodeRequest, MediaEngine, MediaError, MediaResult,
    Packaging, ProgressSink, Representation, Stream, StreamCollection,
};
pub use ffmpeg::FfmpegEngine;
