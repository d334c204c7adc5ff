//! Enrollment repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::EnrollmentDbModel;

/// Enrollment repository trait.
///
/// The pipeline itself never checks enrollment; the REST and realtime
/// ingress layers do, through this trait.
#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    async fn is_enrolled(&self, user_id: &str, course_id: &str) -> Result<bool>;
    async fn create(&self, enrollment: &EnrollmentDbModel) -> Result<()>;
    async fn list_user_ids_for_course(&self, course_id: &str) -> Result<Vec<String>>;
}

/// SQLx implementation of EnrollmentRepository.
pub struct SqlxEnrollmentRepository {
    pool: SqlitePool,
}

impl SqlxEnrollmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnrollmentRepository for SqlxEnrollmentRepository {
    async fn is_enrolled(&self, user_id: &str, course_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM enrollments WHERE user_id = ? AND course_id = ? LIMIT 1",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn create(&self, enrollment: &EnrollmentDbModel) -> Result<()> {
        sqlx::query(
            "INSERT INTO enrollments (id, user_id, course_id, enrolled_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&enrollment.id)
        .bind(&enrollment.user_id)
        .bind(&enrollment.course_id)
        .bind(&enrollment.enrolled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_user_ids_for_course(&self, course_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT user_id FROM enrollments WHERE course_id = ?")
                .bind(course_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
