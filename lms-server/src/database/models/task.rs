//! Task queue database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Task database model.
/// One durably-enqueued unit of background work.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskDbModel {
    pub id: String,
    /// Named queue the task is routed to (e.g. "video_processing").
    pub queue: String,
    /// Job type dispatched to a matching handler (e.g. "process_video").
    pub job_type: String,
    /// JSON payload, opaque to the queue.
    pub payload: String,
    /// Status: queued, running, completed, failed
    pub status: String,
    /// Number of attempts started so far.
    pub attempts: i64,
    /// Total attempt budget (1 initial + N retries).
    pub max_attempts: i64,
    /// Error message from the most recent failed attempt.
    pub last_error: Option<String>,
    /// ISO 8601 timestamp before which the task must not be claimed.
    pub run_at: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl TaskDbModel {
    pub fn new(
        queue: impl Into<String>,
        job_type: impl Into<String>,
        payload: impl Into<String>,
        max_attempts: i64,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue: queue.into(),
            job_type: job_type.into(),
            payload: payload.into(),
            status: TaskStatus::Queued.as_str().to_string(),
            attempts: 0,
            max_attempts,
            last_error: None,
            run_at: now.clone(),
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Task status values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting to be claimed (or rescheduled for a retry).
    Queued,
    /// Claimed by a worker; reset to queued on startup recovery.
    Running,
    /// Finished successfully.
    Completed,
    /// Dead-lettered: retries exhausted or permanent failure.
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_queued_and_runnable_now() {
        let task = TaskDbModel::new("video_processing", "process_video", "{}", 4);
        assert_eq!(task.status, "queued");
        assert_eq!(task.attempts, 0);
        assert_eq!(task.max_attempts, 4);
        assert_eq!(task.run_at, task.created_at);
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(TaskStatus::parse("failed"), Some(TaskStatus::Failed));
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
    }
}
