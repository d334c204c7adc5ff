//! Progress notification bridge.
//!
//! One operation behind both ingress paths: REST progress updates and
//! realtime `progress_update` frames funnel through `apply_update`, so the
//! persisted row and the fan-out behave identically regardless of where the
//! update came from.

use std::sync::Arc;
use tracing::debug;

use crate::database::models::ProgressDbModel;
use crate::database::repositories::ProgressRepository;
use crate::realtime::{ConnectionRegistry, ServerMessage};
use crate::{Error, Result};

/// A progress mutation from either ingress path.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub content_id: String,
    pub progress_percentage: i64,
    pub last_position: Option<i64>,
}

/// The bridge between progress persistence and realtime fan-out.
pub struct ProgressService {
    progress: Arc<dyn ProgressRepository>,
    registry: Arc<ConnectionRegistry>,
}

impl ProgressService {
    pub fn new(progress: Arc<dyn ProgressRepository>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { progress, registry }
    }

    /// Persist a progress update, then fan the change out to the course's
    /// live subscribers.
    ///
    /// Enrollment was already checked by the ingress layer; this method
    /// only owns the update-and-broadcast contract.
    pub async fn apply_update(
        &self,
        user_id: &str,
        course_id: &str,
        update: &ProgressUpdate,
    ) -> Result<ProgressDbModel> {
        if !(0..=100).contains(&update.progress_percentage) {
            return Err(Error::validation(format!(
                "progress_percentage must be 0-100, got {}",
                update.progress_percentage
            )));
        }

        let row = self
            .progress
            .upsert(
                user_id,
                course_id,
                &update.content_id,
                update.progress_percentage,
                update.last_position,
            )
            .await?;

        let delivered = self
            .registry
            .send_to_course(course_id, &ServerMessage::progress_updated(&row));
        debug!(
            user_id,
            course_id,
            content_id = %update.content_id,
            percentage = update.progress_percentage,
            delivered,
            "Progress update applied"
        );

        Ok(row)
    }

    /// Current progress rows for one user in one course (the realtime
    /// channel's initial snapshot).
    pub async fn course_snapshot(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<Vec<ProgressDbModel>> {
        self.progress.list_for_course(user_id, course_id).await
    }

    /// One (user, content) row, if any.
    pub async fn get(&self, user_id: &str, content_id: &str) -> Result<Option<ProgressDbModel>> {
        self.progress.get(user_id, content_id).await
    }
}
