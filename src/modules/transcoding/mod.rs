pub mod encode;
pub mod events;
pub mod manifest;
pub mod model;
pub mod payload;
pub mod probe;
pub mod publish;
pub mod reconcile;
pub mod service;
pub mod source;
pub mod status;
pub mod workspace;

pub use events::TranscodeJob;
pub use service::{JobOutcome, PipelineSettings, TranscodeDeps, TranscodeTask};
