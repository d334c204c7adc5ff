//! Progress repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::ProgressDbModel;

/// Progress repository trait.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    async fn get(&self, user_id: &str, content_id: &str) -> Result<Option<ProgressDbModel>>;
    async fn list_for_course(&self, user_id: &str, course_id: &str)
    -> Result<Vec<ProgressDbModel>>;
    /// Create-or-overwrite the row for (user, content) and return its final
    /// state.
    ///
    /// `completed` is only ever set true (when the incoming percentage hits
    /// 100); a later lower percentage updates the row but leaves a true
    /// `completed` untouched.
    async fn upsert(
        &self,
        user_id: &str,
        course_id: &str,
        content_id: &str,
        progress_percentage: i64,
        last_position: Option<i64>,
    ) -> Result<ProgressDbModel>;
    async fn delete(&self, user_id: &str, content_id: &str) -> Result<()>;
}

/// SQLx implementation of ProgressRepository.
pub struct SqlxProgressRepository {
    pool: SqlitePool,
}

impl SqlxProgressRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProgressRepository for SqlxProgressRepository {
    async fn get(&self, user_id: &str, content_id: &str) -> Result<Option<ProgressDbModel>> {
        let row = sqlx::query_as::<_, ProgressDbModel>(
            "SELECT * FROM course_progress WHERE user_id = ? AND content_id = ?",
        )
        .bind(user_id)
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_for_course(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<Vec<ProgressDbModel>> {
        let rows = sqlx::query_as::<_, ProgressDbModel>(
            "SELECT * FROM course_progress WHERE user_id = ? AND course_id = ? ORDER BY updated_at",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert(
        &self,
        user_id: &str,
        course_id: &str,
        content_id: &str,
        progress_percentage: i64,
        last_position: Option<i64>,
    ) -> Result<ProgressDbModel> {
        let fresh = ProgressDbModel::new(
            user_id,
            course_id,
            content_id,
            progress_percentage,
            last_position,
        );

        // Single statement keeps the sticky-completed rule atomic under the
        // store's row locking: completed flips to 1 at the threshold and is
        // otherwise carried over from the existing row.
        sqlx::query(
            r#"
            INSERT INTO course_progress
                (id, user_id, course_id, content_id, completed, progress_percentage,
                 last_position, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, content_id) DO UPDATE SET
                progress_percentage = excluded.progress_percentage,
                last_position = excluded.last_position,
                completed = CASE
                    WHEN excluded.progress_percentage >= 100 THEN 1
                    ELSE course_progress.completed
                END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&fresh.id)
        .bind(user_id)
        .bind(course_id)
        .bind(content_id)
        .bind(fresh.completed)
        .bind(progress_percentage)
        .bind(last_position)
        .bind(&fresh.updated_at)
        .execute(&self.pool)
        .await?;

        let row = self.get(user_id, content_id).await?;
        row.ok_or_else(|| crate::Error::not_found("Progress", content_id))
    }

    async fn delete(&self, user_id: &str, content_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM course_progress WHERE user_id = ? AND content_id = ?")
            .bind(user_id)
            .bind(content_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
