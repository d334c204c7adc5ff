//! Progress database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One (user, content) pair's consumption state. Unique per pair.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProgressDbModel {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub content_id: String,
    /// Sticky: only ever set true by the 100% threshold, never reset.
    pub completed: bool,
    /// 0-100 inclusive.
    pub progress_percentage: i64,
    /// Resume point in seconds (video only).
    pub last_position: Option<i64>,
    /// ISO 8601 timestamp of the last update.
    pub updated_at: String,
}

impl ProgressDbModel {
    pub fn new(
        user_id: impl Into<String>,
        course_id: impl Into<String>,
        content_id: impl Into<String>,
        progress_percentage: i64,
        last_position: Option<i64>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            course_id: course_id.into(),
            content_id: content_id.into(),
            completed: progress_percentage >= 100,
            progress_percentage,
            last_position,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
