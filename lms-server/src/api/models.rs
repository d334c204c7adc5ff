//! API request/response models.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::database::models::{ProgressDbModel, TaskDbModel};
use crate::realtime::RegistryStats;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub realtime: RealtimeStats,
}

/// Live connection counts.
#[derive(Debug, Serialize, ToSchema)]
pub struct RealtimeStats {
    pub users_connected: usize,
    pub total_connections: usize,
    pub course_buckets: usize,
}

impl From<RegistryStats> for RealtimeStats {
    fn from(stats: RegistryStats) -> Self {
        Self {
            users_connected: stats.users_connected,
            total_connections: stats.total_connections,
            course_buckets: stats.course_buckets,
        }
    }
}

/// Upload acceptance response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Public URL of the stored raw object.
    pub url: String,
    /// "processing" when a pipeline job was enqueued, "complete" otherwise.
    pub status: String,
    /// Content record created for this upload.
    pub content_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub message: String,
}

/// Thumbnail upload response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ThumbnailUploadResponse {
    pub url: String,
    pub message: String,
}

/// Progress update request (REST ingress).
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ProgressRequest {
    pub course_id: String,
    pub content_id: String,
    /// 0-100 inclusive.
    pub progress_percentage: i64,
    #[serde(default)]
    pub last_position: Option<i64>,
}

/// Progress row response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProgressResponse {
    pub id: Option<String>,
    pub user_id: String,
    pub course_id: String,
    pub content_id: String,
    pub completed: bool,
    pub progress_percentage: i64,
    pub last_position: Option<i64>,
    pub updated_at: Option<String>,
}

impl From<ProgressDbModel> for ProgressResponse {
    fn from(row: ProgressDbModel) -> Self {
        Self {
            id: Some(row.id),
            user_id: row.user_id,
            course_id: row.course_id,
            content_id: row.content_id,
            completed: row.completed,
            progress_percentage: row.progress_percentage,
            last_position: row.last_position,
            updated_at: Some(row.updated_at),
        }
    }
}

impl ProgressResponse {
    /// Default response for a pair with no recorded progress yet.
    pub fn empty(user_id: &str, course_id: &str, content_id: &str) -> Self {
        Self {
            id: None,
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
            content_id: content_id.to_string(),
            completed: false,
            progress_percentage: 0,
            last_position: None,
            updated_at: None,
        }
    }
}

/// Per-content entry in a course progress summary.
#[derive(Debug, Serialize, ToSchema)]
pub struct ContentProgressEntry {
    pub content_id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub progress_percentage: i64,
    pub completed: bool,
    pub last_position: Option<i64>,
    pub updated_at: Option<String>,
}

/// Whole-course progress summary.
#[derive(Debug, Serialize, ToSchema)]
pub struct CourseProgressSummary {
    pub course_id: String,
    pub total_content: usize,
    pub completed_content: usize,
    /// Mean percentage across all content items.
    pub overall_progress: f64,
    pub content_progress: Vec<ContentProgressEntry>,
}

/// One quality entry in a video manifest.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ManifestQuality {
    pub name: String,
    pub url: String,
    pub height: u32,
    pub bitrate: String,
}

/// Video manifest response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ManifestResponse {
    pub content_id: String,
    pub title: String,
    /// Duration in seconds.
    pub duration: f64,
    pub qualities: Vec<ManifestQuality>,
}

/// Operator view of one queue task.
#[derive(Debug, Serialize, ToSchema)]
pub struct TaskView {
    pub id: String,
    pub queue: String,
    pub job_type: String,
    pub status: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,
    pub run_at: String,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl From<TaskDbModel> for TaskView {
    fn from(task: TaskDbModel) -> Self {
        Self {
            id: task.id,
            queue: task.queue,
            job_type: task.job_type,
            status: task.status,
            attempts: task.attempts,
            max_attempts: task.max_attempts,
            last_error: task.last_error,
            run_at: task.run_at,
            created_at: task.created_at,
            completed_at: task.completed_at,
        }
    }
}
