//! The transcoding pipeline itself, plus its queue handlers.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::PipelineError;
use super::engine::MediaEngine;
use super::ffmpeg::QUALITY_LADDER;
use crate::database::models::{ContentMetadata, ProcessingStatus};
use crate::database::repositories::ContentRepository;
use crate::queue::{JobContext, JobError, JobHandler, TaskQueue};
use crate::storage::{ObjectStore, unique_key};

/// Payload of a main transcoding job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessVideoPayload {
    pub video_url: String,
    pub course_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

/// Payload of a preview generation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratePreviewPayload {
    pub video_url: String,
    pub course_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

/// Payload enqueued for downstream consumers after a successful publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEventPayload {
    pub content_id: String,
    pub course_id: String,
}

/// Download a source object into the working area.
pub async fn download(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> Result<u64, PipelineError> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| PipelineError::Download(e.to_string()))?;

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| PipelineError::Download(e.to_string()))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    debug!(url, bytes = written, "Source downloaded");
    Ok(written)
}

/// The video transcoding pipeline.
///
/// Every step is re-runnable: outputs are uploaded under fresh object names
/// and the publish step overwrites the whole metadata blob, so redelivery of
/// the same job converges on the same observable state.
pub struct VideoPipeline {
    engine: Arc<dyn MediaEngine>,
    store: Arc<dyn ObjectStore>,
    contents: Arc<dyn ContentRepository>,
    queue: Arc<TaskQueue>,
    client: reqwest::Client,
    default_preview_secs: u32,
}

impl VideoPipeline {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        store: Arc<dyn ObjectStore>,
        contents: Arc<dyn ContentRepository>,
        queue: Arc<TaskQueue>,
        default_preview_secs: u32,
    ) -> Self {
        Self {
            engine,
            store,
            contents,
            queue,
            client: reqwest::Client::new(),
            default_preview_secs,
        }
    }

    /// Execute one attempt of the main transcoding job.
    pub async fn process(&self, payload: &ProcessVideoPayload) -> Result<ContentMetadata, JobError> {
        // Scratch space lives for exactly this attempt; dropping the TempDir
        // removes it on success and on every failure path.
        let scratch = tempfile::TempDir::new().map_err(PipelineError::from)?;
        let input = scratch.path().join(format!("{}.mp4", uuid::Uuid::new_v4()));

        download(&self.client, &payload.video_url, &input).await?;

        let video_metadata = self.engine.probe(&input).await?;
        info!(
            course_id = %payload.course_id,
            duration = video_metadata.duration,
            codec = %video_metadata.codec,
            "Source probed, transcoding {} rungs",
            QUALITY_LADDER.len()
        );

        let mut processed_urls = BTreeMap::new();
        for rung in &QUALITY_LADDER {
            let output = scratch
                .path()
                .join(format!("{}_{}.mp4", uuid::Uuid::new_v4(), rung.label));
            self.engine.transcode_rung(&input, &output, rung).await?;

            let key = unique_key(
                &format!("content/{}/video/{}", payload.course_id, rung.label),
                &format!("{}.mp4", rung.label),
            );
            let url = self.store.put_file(&key, &output, "video/mp4").await?;
            processed_urls.insert(rung.label.to_string(), url);

            // Free the rung's scratch space early; big sources times four
            // rungs add up.
            let _ = tokio::fs::remove_file(&output).await;
        }

        let thumb = scratch
            .path()
            .join(format!("{}_thumb.jpg", uuid::Uuid::new_v4()));
        self.engine.extract_thumbnail(&input, &thumb).await?;
        let thumb_key = unique_key(
            &format!("content/{}/thumbnails", payload.course_id),
            "thumbnail.jpg",
        );
        let thumbnail_url = self.store.put_file(&thumb_key, &thumb, "image/jpeg").await?;

        let metadata = ContentMetadata {
            processed_urls,
            thumbnail_url: Some(thumbnail_url),
            video_metadata: Some(video_metadata),
            processing_status: ProcessingStatus::Completed,
            failure_reason: None,
            preview_url: None,
        };

        if let Some(content_id) = &payload.content_id {
            // Single-statement overwrite; a DB failure here retries the job
            // rather than dropping a fully-transcoded result.
            self.contents
                .set_metadata(content_id, &metadata)
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?;
            info!(content_id = %content_id, "Transcode result published");

            self.enqueue_followups(content_id, &payload.course_id).await;
        } else {
            debug!("No content record attached, skipping publish");
        }

        Ok(metadata)
    }

    /// Enqueue the downstream consumers of a published result.
    ///
    /// Failures only warn: the publish has already happened and redelivery
    /// of the main job would re-transcode everything for the sake of an
    /// enqueue.
    async fn enqueue_followups(&self, content_id: &str, course_id: &str) {
        let event = ContentEventPayload {
            content_id: content_id.to_string(),
            course_id: course_id.to_string(),
        };
        if let Err(e) = self.queue.enqueue("search_index", &event).await {
            warn!(content_id, "Failed to enqueue search indexing: {}", e);
        }
        if let Err(e) = self.queue.enqueue("content_ready", &event).await {
            warn!(content_id, "Failed to enqueue content-ready notification: {}", e);
        }
    }

    /// Execute one attempt of the preview job.
    pub async fn preview(&self, payload: &GeneratePreviewPayload) -> Result<String, JobError> {
        let scratch = tempfile::TempDir::new().map_err(PipelineError::from)?;
        let input = scratch.path().join(format!("{}.mp4", uuid::Uuid::new_v4()));
        download(&self.client, &payload.video_url, &input).await?;

        let duration = payload.duration.unwrap_or(self.default_preview_secs);
        let output = scratch
            .path()
            .join(format!("{}_preview.mp4", uuid::Uuid::new_v4()));
        self.engine.clip_preview(&input, &output, duration).await?;

        let key = unique_key(
            &format!("content/{}/video/preview", payload.course_id),
            "preview.mp4",
        );
        let preview_url = self.store.put_file(&key, &output, "video/mp4").await?;

        if let Some(content_id) = &payload.content_id {
            // Merge just the one key so a concurrently-published main result
            // is never clobbered.
            self.contents
                .set_preview_url(content_id, &preview_url)
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?;
        }

        info!(course_id = %payload.course_id, url = %preview_url, "Preview generated");
        Ok(preview_url)
    }

    /// Mark a content record failed after the retry budget is gone.
    pub async fn mark_failed(&self, content_id: &str, reason: &str) {
        let metadata = ContentMetadata::failed(reason);
        if let Err(e) = self.contents.set_metadata(content_id, &metadata).await {
            warn!(content_id, "Failed to record failed processing status: {}", e);
        }
    }
}

/// Queue handler for the main transcoding job.
pub struct ProcessVideoHandler {
    pipeline: Arc<VideoPipeline>,
}

impl ProcessVideoHandler {
    pub fn new(pipeline: Arc<VideoPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl JobHandler for ProcessVideoHandler {
    fn job_types(&self) -> Vec<&'static str> {
        vec!["process_video"]
    }

    async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        let payload: ProcessVideoPayload = ctx.payload()?;
        self.pipeline.process(&payload).await?;
        Ok(())
    }

    async fn on_exhausted(&self, ctx: &JobContext, error: &JobError) {
        // Leave the record distinguishable from "still processing" so
        // clients don't poll forever.
        if let Ok(payload) = ctx.payload::<ProcessVideoPayload>()
            && let Some(content_id) = &payload.content_id
        {
            self.pipeline.mark_failed(content_id, &error.to_string()).await;
        }
    }

    fn name(&self) -> &'static str {
        "ProcessVideoHandler"
    }
}

/// Queue handler for preview generation.
pub struct PreviewHandler {
    pipeline: Arc<VideoPipeline>,
}

impl PreviewHandler {
    pub fn new(pipeline: Arc<VideoPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl JobHandler for PreviewHandler {
    fn job_types(&self) -> Vec<&'static str> {
        vec!["generate_preview"]
    }

    async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        let payload: GeneratePreviewPayload = ctx.payload()?;
        self.pipeline.preview(&payload).await?;
        Ok(())
    }

    // No on_exhausted: a failed preview must not touch the main blob.

    fn name(&self) -> &'static str {
        "PreviewHandler"
    }
}
