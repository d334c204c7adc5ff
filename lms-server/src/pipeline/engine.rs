//! Media engine abstraction.
//!
//! The pipeline drives probing and encoding through this trait so the
//! orchestration can be exercised without the real binaries; production uses
//! the ffmpeg/ffprobe implementation.

use async_trait::async_trait;
use std::path::Path;

use super::ffmpeg::{Ffmpeg, QualityRung};
use super::{PipelineError, probe};
use crate::config::MediaConfig;
use crate::database::models::VideoMetadata;

/// Probing and encoding operations the pipeline depends on.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn probe(&self, input: &Path) -> Result<VideoMetadata, PipelineError>;

    async fn transcode_rung(
        &self,
        input: &Path,
        output: &Path,
        rung: &QualityRung,
    ) -> Result<(), PipelineError>;

    async fn extract_thumbnail(&self, input: &Path, output: &Path) -> Result<(), PipelineError>;

    async fn clip_preview(
        &self,
        input: &Path,
        output: &Path,
        duration_secs: u32,
    ) -> Result<(), PipelineError>;
}

/// ffmpeg/ffprobe-backed engine.
pub struct FfmpegEngine {
    ffmpeg: Ffmpeg,
    ffprobe_path: String,
}

impl FfmpegEngine {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffmpeg: Ffmpeg::new(&config.ffmpeg_path),
            ffprobe_path: config.ffprobe_path.clone(),
        }
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn probe(&self, input: &Path) -> Result<VideoMetadata, PipelineError> {
        probe::probe_file(&self.ffprobe_path, input).await
    }

    async fn transcode_rung(
        &self,
        input: &Path,
        output: &Path,
        rung: &QualityRung,
    ) -> Result<(), PipelineError> {
        self.ffmpeg.transcode_rung(input, output, rung).await
    }

    async fn extract_thumbnail(&self, input: &Path, output: &Path) -> Result<(), PipelineError> {
        self.ffmpeg.extract_thumbnail(input, output).await
    }

    async fn clip_preview(
        &self,
        input: &Path,
        output: &Path,
        duration_secs: u32,
    ) -> Result<(), PipelineError> {
        self.ffmpeg.clip_preview(input, output, duration_secs).await
    }
}
