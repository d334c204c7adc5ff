//! WebSocket message shapes.
//!
//! Tagged JSON frames, one JSON object per text message.

use serde::{Deserialize, Serialize};

use crate::database::models::ProgressDbModel;

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Messages accepted from clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    SubscribeCourse {
        course_id: String,
    },
    UnsubscribeCourse {
        course_id: String,
    },
    ProgressUpdate {
        content_id: String,
        progress_percentage: i64,
        #[serde(default)]
        last_position: Option<i64>,
    },
}

/// One progress row as sent in the initial snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressSnapshot {
    pub content_id: String,
    pub progress_percentage: i64,
    pub completed: bool,
    pub last_position: Option<i64>,
    pub updated_at: String,
}

impl From<&ProgressDbModel> for ProgressSnapshot {
    fn from(row: &ProgressDbModel) -> Self {
        Self {
            content_id: row.content_id.clone(),
            progress_percentage: row.progress_percentage,
            completed: row.completed,
            last_position: row.last_position,
            updated_at: row.updated_at.clone(),
        }
    }
}

/// Messages pushed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connection {
        message: String,
        user_id: String,
        timestamp: String,
    },
    Pong {
        timestamp: String,
    },
    SubscriptionConfirmed {
        course_id: String,
        message: String,
    },
    UnsubscriptionConfirmed {
        course_id: String,
        message: String,
    },
    InitialProgress {
        course_id: String,
        progress: Vec<ProgressSnapshot>,
        timestamp: String,
    },
    ProgressUpdated {
        user_id: String,
        course_id: String,
        content_id: String,
        progress_percentage: i64,
        completed: bool,
        timestamp: String,
    },
    Notification {
        data: serde_json::Value,
        timestamp: String,
    },
    CourseNotification {
        data: serde_json::Value,
        timestamp: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn connected(user_id: &str) -> Self {
        Self::Connection {
            message: "Connected to notifications".to_string(),
            user_id: user_id.to_string(),
            timestamp: now_iso(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: now_iso(),
        }
    }

    pub fn subscription_confirmed(course_id: &str) -> Self {
        Self::SubscriptionConfirmed {
            course_id: course_id.to_string(),
            message: "Subscribed to course updates".to_string(),
        }
    }

    pub fn unsubscription_confirmed(course_id: &str) -> Self {
        Self::UnsubscriptionConfirmed {
            course_id: course_id.to_string(),
            message: "Unsubscribed from course updates".to_string(),
        }
    }

    pub fn initial_progress(course_id: &str, rows: &[ProgressDbModel]) -> Self {
        Self::InitialProgress {
            course_id: course_id.to_string(),
            progress: rows.iter().map(ProgressSnapshot::from).collect(),
            timestamp: now_iso(),
        }
    }

    pub fn progress_updated(row: &ProgressDbModel) -> Self {
        Self::ProgressUpdated {
            user_id: row.user_id.clone(),
            course_id: row.course_id.clone(),
            content_id: row.content_id.clone(),
            progress_percentage: row.progress_percentage,
            completed: row.completed,
            timestamp: now_iso(),
        }
    }

    pub fn course_notification(data: serde_json::Value) -> Self {
        Self::CourseNotification {
            data,
            timestamp: now_iso(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
