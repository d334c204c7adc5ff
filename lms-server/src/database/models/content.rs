//! Course content database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

/// Course content database model.
/// Represents one uploaded piece of course material and its processing state.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ContentDbModel {
    pub id: String,
    pub course_id: String,
    /// Content type: video, presentation
    pub content_type: String,
    pub title: String,
    pub description: Option<String>,
    /// URL of the raw uploaded source file
    pub file_url: String,
    /// Source file size in bytes
    pub file_size: Option<i64>,
    /// Duration in minutes (video only)
    pub duration: Option<i64>,
    /// Ordering within the owning course
    pub order_index: i64,
    /// JSON blob holding the pipeline's published outputs
    pub metadata: Option<String>,
    /// ISO 8601 timestamp when the record was created
    pub created_at: String,
    /// ISO 8601 timestamp when the record was last updated
    pub updated_at: String,
}

impl ContentDbModel {
    pub fn new(
        course_id: impl Into<String>,
        content_type: ContentType,
        title: impl Into<String>,
        file_url: impl Into<String>,
        order_index: i64,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            course_id: course_id.into(),
            content_type: content_type.as_str().to_string(),
            title: title.into(),
            description: None,
            file_url: file_url.into(),
            file_size: None,
            duration: None,
            order_index,
            metadata: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Parse the metadata blob, if present.
    pub fn parsed_metadata(&self) -> Option<ContentMetadata> {
        self.metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Content types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Video,
    Presentation,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Presentation => "presentation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "video" => Some(Self::Video),
            "presentation" => Some(Self::Presentation),
            _ => None,
        }
    }
}

/// Processing status values recorded in the metadata blob.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Upload accepted, job not yet picked up.
    Pending,
    /// A worker is executing the pipeline.
    Processing,
    /// All renditions published.
    Completed,
    /// Retries exhausted; `failure_reason` carries the last error.
    Failed,
}

/// Technical metadata probed from the source video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VideoMetadata {
    /// Duration in seconds.
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    /// Source bitrate in bits per second.
    pub bitrate: u64,
}

/// The pipeline's published output contract.
///
/// Written as a whole (last-writer-wins) by the publish step; `preview_url`
/// is the one key merged independently since preview generation runs as a
/// separate job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    /// Quality label -> playable URL. Non-empty for processed video.
    #[serde(default)]
    pub processed_urls: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_metadata: Option<VideoMetadata>,
    pub processing_status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
}

impl ContentMetadata {
    pub fn processing() -> Self {
        Self {
            processed_urls: BTreeMap::new(),
            thumbnail_url: None,
            video_metadata: None,
            processing_status: ProcessingStatus::Processing,
            failure_reason: None,
            preview_url: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            processed_urls: BTreeMap::new(),
            thumbnail_url: None,
            video_metadata: None,
            processing_status: ProcessingStatus::Failed,
            failure_reason: Some(reason.into()),
            preview_url: None,
        }
    }
}
