//! Video transcoding pipeline.
//!
//! Turns one uploaded source video into a fixed ladder of renditions plus a
//! thumbnail, then publishes the result onto the content record in a single
//! idempotent write. Runs under the durable queue's at-least-once semantics,
//! so every external effect here is safe to repeat.

pub mod engine;
pub mod ffmpeg;
pub mod probe;
pub mod video;

pub use engine::{FfmpegEngine, MediaEngine};
pub use ffmpeg::{Ffmpeg, QUALITY_LADDER, QualityRung};
pub use video::{
    GeneratePreviewPayload, PreviewHandler, ProcessVideoHandler, ProcessVideoPayload,
    VideoPipeline,
};

use crate::queue::JobError;

/// Pipeline-internal error type.
///
/// Classified into the queue's retryable/permanent split at the handler
/// boundary: malformed input cannot succeed on retry, everything else is
/// assumed transient.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no decodable video stream in source")]
    NoVideoStream,

    #[error("probe output malformed: {0}")]
    MalformedProbe(String),

    #[error("{tool} exited with status {status}: {stderr}")]
    ToolFailed {
        tool: &'static str,
        status: i32,
        stderr: String,
    },

    #[error("failed to spawn {tool}: {source}")]
    ToolSpawn {
        tool: &'static str,
        source: std::io::Error,
    },

    #[error("download failed: {0}")]
    Download(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    App(#[from] crate::Error),
}

impl From<PipelineError> for JobError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NoVideoStream | PipelineError::MalformedProbe(_) => {
                JobError::permanent(err.to_string())
            }
            other => JobError::retryable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_input_is_permanent() {
        let err: JobError = PipelineError::NoVideoStream.into();
        assert!(err.is_permanent());

        let err: JobError = PipelineError::MalformedProbe("not json".into()).into();
        assert!(err.is_permanent());
    }

    #[test]
    fn test_infrastructure_failures_are_retryable() {
        let err: JobError = PipelineError::Download("connection reset".into()).into();
        assert!(!err.is_permanent());

        let err: JobError = PipelineError::ToolFailed {
            tool: "ffmpeg",
            status: 1,
            stderr: "disk full".into(),
        }
        .into();
        assert!(!err.is_permanent());
    }
}
