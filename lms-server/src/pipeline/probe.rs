//! Source probing via ffprobe.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::PipelineError;
use crate::database::models::VideoMetadata;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    // ffprobe reports these as strings
    duration: Option<String>,
    r_frame_rate: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

/// Parse an "N/D" rational frame rate. Returns 0 for degenerate values.
fn parse_frame_rate(raw: &str) -> f64 {
    let mut parts = raw.splitn(2, '/');
    let num: f64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0.0);
    let den: f64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1.0);
    if den == 0.0 { 0.0 } else { num / den }
}

/// Interpret raw ffprobe JSON.
///
/// The first video stream wins; its absence is the one malformed-input case
/// the pipeline refuses to retry. Duration and bitrate fall back to the
/// container values since some formats only carry them there.
pub fn parse_probe_output(json: &str) -> Result<VideoMetadata, PipelineError> {
    let probe: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| PipelineError::MalformedProbe(e.to_string()))?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(PipelineError::NoVideoStream)?;

    let stream_duration = video.duration.as_deref().and_then(|d| d.parse::<f64>().ok());
    let format_duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok());

    let stream_bitrate = video.bit_rate.as_deref().and_then(|b| b.parse::<u64>().ok());
    let format_bitrate = probe
        .format
        .as_ref()
        .and_then(|f| f.bit_rate.as_deref())
        .and_then(|b| b.parse::<u64>().ok());

    Ok(VideoMetadata {
        duration: stream_duration.or(format_duration).unwrap_or(0.0),
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        fps: video
            .r_frame_rate
            .as_deref()
            .map(parse_frame_rate)
            .unwrap_or(0.0),
        codec: video.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
        bitrate: stream_bitrate.or(format_bitrate).unwrap_or(0),
    })
}

/// Probe a local file for technical metadata.
pub async fn probe_file(
    ffprobe_path: &str,
    input: &Path,
) -> Result<VideoMetadata, PipelineError> {
    let output = Command::new(ffprobe_path)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(input)
        .env("LC_ALL", "C")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| PipelineError::ToolSpawn {
            tool: "ffprobe",
            source,
        })?;

    if !output.status.success() {
        return Err(PipelineError::ToolFailed {
            tool: "ffprobe",
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let json = String::from_utf8_lossy(&output.stdout);
    debug!(path = %input.display(), "ffprobe completed");
    parse_probe_output(&json)
}
