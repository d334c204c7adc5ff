//! ffmpeg command driver for transcoding, thumbnails, and previews.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use super::PipelineError;

/// One fixed-quality output of the transcode ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityRung {
    pub label: &'static str,
    /// Vertical resolution; width follows the source aspect ratio.
    pub height: u32,
    pub video_bitrate: &'static str,
    pub audio_bitrate: &'static str,
}

/// The fixed quality ladder. Every rung is always produced, regardless of
/// source resolution.
pub const QUALITY_LADDER: [QualityRung; 4] = [
    QualityRung {
        label: "1080p",
        height: 1080,
        video_bitrate: "5000k",
        audio_bitrate: "128k",
    },
    QualityRung {
        label: "720p",
        height: 720,
        video_bitrate: "2500k",
        audio_bitrate: "128k",
    },
    QualityRung {
        label: "480p",
        height: 480,
        video_bitrate: "1000k",
        audio_bitrate: "128k",
    },
    QualityRung {
        label: "360p",
        height: 360,
        video_bitrate: "500k",
        audio_bitrate: "128k",
    },
];

/// Look up a ladder rung by label.
pub fn rung_by_label(label: &str) -> Option<&'static QualityRung> {
    QUALITY_LADDER.iter().find(|r| r.label == label)
}

/// Thin wrapper around the ffmpeg binary.
pub struct Ffmpeg {
    ffmpeg_path: String,
}

impl Ffmpeg {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    fn rung_args(input: &Path, output: &Path, rung: &QualityRung) -> Vec<String> {
        vec![
            "-y".into(),
            "-hide_banner".into(),
            "-i".into(),
            input.display().to_string(),
            // -2 keeps the width divisible by 2 for the encoder
            "-vf".into(),
            format!("scale=-2:{}", rung.height),
            "-b:v".into(),
            rung.video_bitrate.into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            rung.audio_bitrate.into(),
            "-preset".into(),
            "medium".into(),
            "-crf".into(),
            "23".into(),
            output.display().to_string(),
        ]
    }

    fn thumbnail_args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".into(),
            "-hide_banner".into(),
            "-ss".into(),
            "1".into(),
            "-i".into(),
            input.display().to_string(),
            "-vframes".into(),
            "1".into(),
            "-f".into(),
            "image2".into(),
            output.display().to_string(),
        ]
    }

    fn preview_args(input: &Path, output: &Path, duration_secs: u32) -> Vec<String> {
        vec![
            "-y".into(),
            "-hide_banner".into(),
            "-t".into(),
            duration_secs.to_string(),
            "-i".into(),
            input.display().to_string(),
            "-vf".into(),
            "scale=640:360".into(),
            "-b:v".into(),
            "1000k".into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            "64k".into(),
            output.display().to_string(),
        ]
    }

    async fn run(&self, args: Vec<String>) -> Result<(), PipelineError> {
        debug!("ffmpeg {}", args.join(" "));

        let child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PipelineError::ToolSpawn {
                tool: "ffmpeg",
                source,
            })?;

        let output = child.wait_with_output().await.map_err(|source| {
            PipelineError::ToolSpawn {
                tool: "ffmpeg",
                source,
            }
        })?;

        if !output.status.success() {
            return Err(PipelineError::ToolFailed {
                tool: "ffmpeg",
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(())
    }

    /// Transcode the source into one ladder rung.
    pub async fn transcode_rung(
        &self,
        input: &Path,
        output: &Path,
        rung: &QualityRung,
    ) -> Result<(), PipelineError> {
        let start = std::time::Instant::now();
        self.run(Self::rung_args(input, output, rung)).await?;
        info!(
            "Transcoded {} rung in {:.2}s: {}",
            rung.label,
            start.elapsed().as_secs_f64(),
            output.display()
        );
        Ok(())
    }

    /// Extract a representative still frame at the 1-second mark.
    pub async fn extract_thumbnail(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<(), PipelineError> {
        self.run(Self::thumbnail_args(input, output)).await
    }

    /// Produce a short low-bitrate preview clip.
    pub async fn clip_preview(
        &self,
        input: &Path,
        output: &Path,
        duration_secs: u32,
    ) -> Result<(), PipelineError> {
        self.run(Self::preview_args(input, output, duration_secs)).await
    }
}
