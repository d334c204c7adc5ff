//! Content-ready notification fan-out job.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::messages::ServerMessage;
use super::registry::ConnectionRegistry;
use crate::database::repositories::ContentRepository;
use crate::pipeline::video::ContentEventPayload;
use crate::queue::{JobContext, JobError, JobHandler};

/// Pushes a course notification to live subscribers once the pipeline has
/// published a content record. Delivery is best-effort by design; a course
/// with no live subscribers is a successful no-op.
pub struct ContentReadyHandler {
    registry: Arc<ConnectionRegistry>,
    contents: Arc<dyn ContentRepository>,
}

impl ContentReadyHandler {
    pub fn new(registry: Arc<ConnectionRegistry>, contents: Arc<dyn ContentRepository>) -> Self {
        Self { registry, contents }
    }
}

#[async_trait]
impl JobHandler for ContentReadyHandler {
    fn job_types(&self) -> Vec<&'static str> {
        vec!["content_ready"]
    }

    async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        let payload: ContentEventPayload = ctx.payload()?;
        let content = self.contents.get(&payload.content_id).await?;

        let message = ServerMessage::course_notification(serde_json::json!({
            "title": "New content available",
            "message": format!("'{}' is ready to watch", content.title),
            "content_id": content.id,
            "course_id": content.course_id,
        }));
        let delivered = self.registry.send_to_course(&payload.course_id, &message);
        debug!(
            course_id = %payload.course_id,
            delivered,
            "Content-ready notification fanned out"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ContentReadyHandler"
    }
}
