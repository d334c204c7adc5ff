//! Enrollment database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Enrollment row linking a user to a course. Unique per (user, course).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EnrollmentDbModel {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub enrolled_at: String,
}

impl EnrollmentDbModel {
    pub fn new(user_id: impl Into<String>, course_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            course_id: course_id.into(),
            enrolled_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
