//! Search index consumer.
//!
//! Downstream of the pipeline: once a content record is published, an
//! indexing job pushes its document to the external search service. Only the
//! indexing side lives here; querying is the search service's own surface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::database::models::ContentDbModel;
use crate::database::repositories::ContentRepository;
use crate::pipeline::video::ContentEventPayload;
use crate::queue::{JobContext, JobError, JobHandler};
use crate::{Error, Result};

/// The content document shape pushed to the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentDocument {
    pub id: String,
    pub course_id: String,
    pub course_title: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub order_index: i64,
    pub duration: i64,
    pub file_size: i64,
    pub file_url: String,
    pub thumbnail_url: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ContentDocument {
    pub fn from_record(content: &ContentDbModel, course_title: &str) -> Self {
        let thumbnail_url = content
            .parsed_metadata()
            .and_then(|m| m.thumbnail_url)
            .unwrap_or_default();
        Self {
            id: content.id.clone(),
            course_id: content.course_id.clone(),
            course_title: course_title.to_string(),
            title: content.title.clone(),
            description: content.description.clone().unwrap_or_default(),
            content_type: content.content_type.clone(),
            order_index: content.order_index,
            duration: content.duration.unwrap_or(0),
            file_size: content.file_size.unwrap_or(0),
            file_url: content.file_url.clone(),
            thumbnail_url,
            created_at: content.created_at.clone(),
            updated_at: content.updated_at.clone(),
        }
    }
}

/// HTTP client for the document index.
pub struct SearchIndexer {
    client: reqwest::Client,
    config: SearchConfig,
}

impl SearchIndexer {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn document_url(&self, id: &str) -> String {
        format!(
            "{}/indexes/content/documents/{}",
            self.config.base_url.trim_end_matches('/'),
            id
        )
    }

    pub async fn index_content(&self, document: &ContentDocument) -> Result<()> {
        let response = self
            .client
            .put(self.document_url(&document.id))
            .json(document)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Other(format!(
                "indexing document '{}' failed with status {}",
                document.id,
                response.status()
            )));
        }
        debug!(content_id = %document.id, "Content document indexed");
        Ok(())
    }

    pub async fn delete_content(&self, id: &str) -> Result<()> {
        let response = self.client.delete(self.document_url(id)).send().await?;
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Other(format!(
                "deleting document '{}' failed with status {}",
                id,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Queue handler: index one published content record.
pub struct SearchIndexHandler {
    indexer: Arc<SearchIndexer>,
    contents: Arc<dyn ContentRepository>,
}

impl SearchIndexHandler {
    pub fn new(indexer: Arc<SearchIndexer>, contents: Arc<dyn ContentRepository>) -> Self {
        Self { indexer, contents }
    }
}

#[async_trait]
impl JobHandler for SearchIndexHandler {
    fn job_types(&self) -> Vec<&'static str> {
        vec!["search_index"]
    }

    async fn run(&self, ctx: &JobContext) -> std::result::Result<(), JobError> {
        let payload: ContentEventPayload = ctx.payload()?;
        let (content, course_title) = self
            .contents
            .get_with_course_title(&payload.content_id)
            .await?;
        let document = ContentDocument::from_record(&content, &course_title);
        self.indexer.index_content(&document).await?;
        info!(content_id = %payload.content_id, "Search index updated");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SearchIndexHandler"
    }
}

/// Queue handler: remove a deleted content record from the index.
pub struct SearchDeleteHandler {
    indexer: Arc<SearchIndexer>,
}

impl SearchDeleteHandler {
    pub fn new(indexer: Arc<SearchIndexer>) -> Self {
        Self { indexer }
    }
}

#[async_trait]
impl JobHandler for SearchDeleteHandler {
    fn job_types(&self) -> Vec<&'static str> {
        vec!["search_delete"]
    }

    async fn run(&self, ctx: &JobContext) -> std::result::Result<(), JobError> {
        let payload: ContentEventPayload = ctx.payload()?;
        self.indexer.delete_content(&payload.content_id).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SearchDeleteHandler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{ContentMetadata, ContentType, ProcessingStatus};
    use axum::Router;
    use axum::extract::State;
    use axum::routing::put;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use tokio::net::TcpListener;

    fn record_with_metadata() -> ContentDbModel {
        let mut content =
            ContentDbModel::new("course-1", ContentType::Video, "Lesson 1", "https://cdn/raw.mp4", 2);
        content.description = Some("Ownership and borrowing".to_string());
        content.duration = Some(12);
        content.file_size = Some(1024);
        let metadata = ContentMetadata {
            processed_urls: BTreeMap::new(),
            thumbnail_url: Some("https://cdn/thumb.jpg".to_string()),
            video_metadata: None,
            processing_status: ProcessingStatus::Completed,
            failure_reason: None,
            preview_url: None,
        };
        content.metadata = Some(serde_json::to_string(&metadata).unwrap());
        content
    }

    #[test]
    fn test_document_from_record() {
        let content = record_with_metadata();
        let doc = ContentDocument::from_record(&content, "Rust Basics");

        assert_eq!(doc.course_title, "Rust Basics");
        assert_eq!(doc.content_type, "video");
        assert_eq!(doc.duration, 12);
        assert_eq!(doc.thumbnail_url, "https://cdn/thumb.jpg");

        // The index sees `type`, not `content_type`.
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains(r#""type":"video""#));
        assert!(!json.contains("content_type"));
    }

    #[tokio::test]
    async fn test_index_content_puts_document() {
        let received: Arc<Mutex<Option<serde_json::Value>>> = Arc::new(Mutex::new(None));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = Router::new()
            .route(
                "/indexes/content/documents/{id}",
                put(
                    |State(state): State<Arc<Mutex<Option<serde_json::Value>>>>,
                     axum::Json(body): axum::Json<serde_json::Value>| async move {
                        *state.lock() = Some(body);
                        "ok"
                    },
                ),
            )
            .with_state(received.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let indexer = SearchIndexer::new(SearchConfig {
            base_url: format!("http://{addr}"),
        });
        let doc = ContentDocument::from_record(&record_with_metadata(), "Rust Basics");
        indexer.index_content(&doc).await.unwrap();

        let body = received.lock().clone().unwrap();
        assert_eq!(body["course_title"], "Rust Basics");
        assert_eq!(body["type"], "video");
    }

    #[tokio::test]
    async fn test_index_failure_surfaces_as_error() {
        let indexer = SearchIndexer::new(SearchConfig {
            base_url: "http://127.0.0.1:1".to_string(),
        });
        let doc = ContentDocument::from_record(&record_with_metadata(), "Rust Basics");
        assert!(indexer.index_content(&doc).await.is_err());
    }
}
