//! Task repository backing the durable queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::database::models::{TaskDbModel, TaskStatus};
use crate::{Error, Result};

/// How many claim races to tolerate before reporting "nothing to do".
const CLAIM_RETRIES: usize = 3;

/// Task repository trait.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<TaskDbModel>;
    async fn create(&self, task: &TaskDbModel) -> Result<()>;
    /// Atomically claim the oldest runnable task on a queue, marking it
    /// running and counting the attempt. Returns None when the queue is
    /// empty (or every candidate was claimed by another worker first).
    async fn claim_next(&self, queue: &str) -> Result<Option<TaskDbModel>>;
    async fn complete(&self, id: &str) -> Result<()>;
    /// Push a failed attempt back onto the queue with a new run_at.
    async fn reschedule(&self, id: &str, run_at: DateTime<Utc>, error: &str) -> Result<()>;
    /// Dead-letter: stop retrying and record the final error.
    async fn fail(&self, id: &str, error: &str) -> Result<()>;
    /// Reset running tasks back to queued (startup crash recovery).
    async fn reset_running(&self) -> Result<u64>;
    /// Operator action: put a dead-lettered task back on its queue with a
    /// fresh attempt budget.
    async fn requeue(&self, id: &str) -> Result<TaskDbModel>;
    async fn list_recent(&self, limit: i64) -> Result<Vec<TaskDbModel>>;
    async fn list_dead_letter(&self) -> Result<Vec<TaskDbModel>>;
}

/// SQLx implementation of TaskRepository.
pub struct SqlxTaskRepository {
    pool: SqlitePool,
}

impl SqlxTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqlxTaskRepository {
    async fn get(&self, id: &str) -> Result<TaskDbModel> {
        sqlx::query_as::<_, TaskDbModel>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Task", id))
    }

    async fn create(&self, task: &TaskDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks
                (id, queue, job_type, payload, status, attempts, max_attempts,
                 last_error, run_at, created_at, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.queue)
        .bind(&task.job_type)
        .bind(&task.payload)
        .bind(&task.status)
        .bind(task.attempts)
        .bind(task.max_attempts)
        .bind(&task.last_error)
        .bind(&task.run_at)
        .bind(&task.created_at)
        .bind(&task.started_at)
        .bind(&task.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_next(&self, queue: &str) -> Result<Option<TaskDbModel>> {
        let now = Utc::now().to_rfc3339();

        for _ in 0..CLAIM_RETRIES {
            let candidate: Option<(String,)> = sqlx::query_as(
                r#"
                SELECT id FROM tasks
                WHERE queue = ? AND status = 'queued' AND run_at <= ?
                ORDER BY created_at
                LIMIT 1
                "#,
            )
            .bind(queue)
            .bind(&now)
            .fetch_optional(&self.pool)
            .await?;

            let Some((id,)) = candidate else {
                return Ok(None);
            };

            // The status guard makes the claim atomic: if another worker got
            // here first, zero rows change and we pick the next candidate.
            let claimed = sqlx::query(
                r#"
                UPDATE tasks
                SET status = 'running', attempts = attempts + 1, started_at = ?
                WHERE id = ? AND status = 'queued'
                "#,
            )
            .bind(&now)
            .bind(&id)
            .execute(&self.pool)
            .await?;

            if claimed.rows_affected() == 1 {
                return Ok(Some(self.get(&id).await?));
            }
        }

        Ok(None)
    }

    async fn complete(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE tasks SET status = 'completed', completed_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reschedule(&self, id: &str, run_at: DateTime<Utc>, error: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = 'queued', run_at = ?, last_error = ? WHERE id = ?")
            .bind(run_at.to_rfc3339())
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail(&self, id: &str, error: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE tasks SET status = 'failed', last_error = ?, completed_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_running(&self) -> Result<u64> {
        let result =
            sqlx::query("UPDATE tasks SET status = 'queued', started_at = NULL WHERE status = 'running'")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn requeue(&self, id: &str) -> Result<TaskDbModel> {
        let task = self.get(id).await?;
        if TaskStatus::parse(&task.status) != Some(TaskStatus::Failed) {
            return Err(Error::validation(format!(
                "Task {} is not dead-lettered (status: {})",
                id, task.status
            )));
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'queued', attempts = 0, last_error = NULL,
                run_at = ?, started_at = NULL, completed_at = NULL
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get(id).await
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<TaskDbModel>> {
        let tasks =
            sqlx::query_as::<_, TaskDbModel>("SELECT * FROM tasks ORDER BY created_at DESC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
        Ok(tasks)
    }

    async fn list_dead_letter(&self) -> Result<Vec<TaskDbModel>> {
        let tasks = sqlx::query_as::<_, TaskDbModel>(
            "SELECT * FROM tasks WHERE status = 'failed' ORDER BY completed_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }
}
