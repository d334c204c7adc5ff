//! Content repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{ContentDbModel, ContentMetadata};
use crate::{Error, Result};

/// Content repository trait.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<ContentDbModel>;
    /// Fetch a content row together with its owning course's title.
    async fn get_with_course_title(&self, id: &str) -> Result<(ContentDbModel, String)>;
    async fn course_exists(&self, course_id: &str) -> Result<bool>;
    async fn list_for_course(&self, course_id: &str) -> Result<Vec<ContentDbModel>>;
    async fn create(&self, content: &ContentDbModel) -> Result<()>;
    /// Overwrite the whole metadata blob in a single statement.
    ///
    /// This is the pipeline's only publish path; last writer wins, which is
    /// what makes redelivered jobs safe to re-run.
    async fn set_metadata(&self, id: &str, metadata: &ContentMetadata) -> Result<()>;
    /// Merge only the preview URL into the blob, preserving everything the
    /// main pipeline may have published concurrently.
    async fn set_preview_url(&self, id: &str, preview_url: &str) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// SQLx implementation of ContentRepository.
pub struct SqlxContentRepository {
    pool: SqlitePool,
}

impl SqlxContentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentRepository for SqlxContentRepository {
    async fn get(&self, id: &str) -> Result<ContentDbModel> {
        sqlx::query_as::<_, ContentDbModel>("SELECT * FROM course_contents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Content", id))
    }

    async fn get_with_course_title(&self, id: &str) -> Result<(ContentDbModel, String)> {
        let content = self.get(id).await?;
        let title: Option<(String,)> = sqlx::query_as("SELECT title FROM courses WHERE id = ?")
            .bind(&content.course_id)
            .fetch_optional(&self.pool)
            .await?;
        let title = title
            .map(|row| row.0)
            .ok_or_else(|| Error::not_found("Course", &content.course_id))?;
        Ok((content, title))
    }

    async fn course_exists(&self, course_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM courses WHERE id = ? LIMIT 1")
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn list_for_course(&self, course_id: &str) -> Result<Vec<ContentDbModel>> {
        let contents = sqlx::query_as::<_, ContentDbModel>(
            "SELECT * FROM course_contents WHERE course_id = ? ORDER BY order_index",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(contents)
    }

    async fn create(&self, content: &ContentDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO course_contents
                (id, course_id, content_type, title, description, file_url, file_size,
                 duration, order_index, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&content.id)
        .bind(&content.course_id)
        .bind(&content.content_type)
        .bind(&content.title)
        .bind(&content.description)
        .bind(&content.file_url)
        .bind(content.file_size)
        .bind(content.duration)
        .bind(content.order_index)
        .bind(&content.metadata)
        .bind(&content.created_at)
        .bind(&content.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_metadata(&self, id: &str, metadata: &ContentMetadata) -> Result<()> {
        let blob = serde_json::to_string(metadata)?;
        let now = chrono::Utc::now().to_rfc3339();
        let result =
            sqlx::query("UPDATE course_contents SET metadata = ?, updated_at = ? WHERE id = ?")
                .bind(&blob)
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Content", id));
        }
        Ok(())
    }

    async fn set_preview_url(&self, id: &str, preview_url: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE course_contents
            SET metadata = json_set(COALESCE(metadata, '{}'), '$.preview_url', ?),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(preview_url)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Content", id));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM course_contents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::SqlitePool;

    pub async fn seed_course(pool: &SqlitePool, course_id: &str, title: &str) {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO courses (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(course_id)
        .bind(title)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
    }

    pub async fn seed_user(pool: &SqlitePool, user_id: &str) {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query("INSERT INTO users (id, email, created_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(format!("{user_id}@example.com"))
            .bind(&now)
            .execute(pool)
            .await
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::seed_course;
    use super::*;
    use crate::database::models::{ContentType, ProcessingStatus, VideoMetadata};
    use crate::database::test_pool;
    use std::collections::BTreeMap;

    async fn seeded_repo() -> (SqlxContentRepository, ContentDbModel) {
        let pool = test_pool().await;
        seed_course(&pool, "course-1", "Rust Basics").await;

        let repo = SqlxContentRepository::new(pool);
        let content = ContentDbModel::new(
            "course-1",
            ContentType::Video,
            "Lesson 1",
            "https://cdn/raw.mp4",
            0,
        );
        repo.create(&content).await.unwrap();
        (repo, content)
    }

    fn completed_metadata(label: &str, url: &str) -> ContentMetadata {
        let mut urls = BTreeMap::new();
        urls.insert(label.to_string(), url.to_string());
        ContentMetadata {
            processed_urls: urls,
            thumbnail_url: Some("https://cdn/thumb.jpg".to_string()),
            video_metadata: Some(VideoMetadata::default()),
            processing_status: ProcessingStatus::Completed,
            failure_reason: None,
            preview_url: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (repo, content) = seeded_repo().await;
        let fetched = repo.get(&content.id).await.unwrap();
        assert_eq!(fetched.title, "Lesson 1");
        assert_eq!(fetched.content_type, "video");
        assert!(fetched.metadata.is_none());
    }

    #[tokio::test]
    async fn test_get_with_course_title() {
        let (repo, content) = seeded_repo().await;
        let (_, title) = repo.get_with_course_title(&content.id).await.unwrap();
        assert_eq!(title, "Rust Basics");
    }

    #[tokio::test]
    async fn test_set_metadata_is_last_writer_wins() {
        let (repo, content) = seeded_repo().await;

        let first = completed_metadata("720p", "https://cdn/a/720p.mp4");
        let second = completed_metadata("1080p", "https://cdn/b/1080p.mp4");

        repo.set_metadata(&content.id, &first).await.unwrap();
        repo.set_metadata(&content.id, &second).await.unwrap();

        let stored = repo.get(&content.id).await.unwrap().parsed_metadata().unwrap();
        // The blob equals the second payload exactly; nothing from the first
        // write survives the overwrite.
        assert_eq!(stored, second);
        assert!(!stored.processed_urls.contains_key("720p"));
    }

    #[tokio::test]
    async fn test_preview_url_merge_preserves_published_blob() {
        let (repo, content) = seeded_repo().await;

        let published = completed_metadata("720p", "https://cdn/a/720p.mp4");
        repo.set_metadata(&content.id, &published).await.unwrap();
        repo.set_preview_url(&content.id, "https://cdn/a/preview.mp4")
            .await
            .unwrap();

        let stored = repo.get(&content.id).await.unwrap().parsed_metadata().unwrap();
        assert_eq!(
            stored.preview_url.as_deref(),
            Some("https://cdn/a/preview.mp4")
        );
        assert_eq!(stored.processed_urls, published.processed_urls);
        assert_eq!(stored.processing_status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn test_set_metadata_missing_content() {
        let (repo, _) = seeded_repo().await;
        let err = repo
            .set_metadata("missing", &ContentMetadata::processing())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
