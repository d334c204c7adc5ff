//! Durable, database-backed task queue.
//!
//! Accepted jobs are executed at least once: rows survive restarts, claimed
//! rows are reset on startup, and failed attempts are rescheduled with
//! exponential backoff until the attempt budget runs out. Exactly-once is
//! explicitly not provided; handlers make their terminal effects idempotent
//! instead.

pub mod handler;
pub mod worker;

pub use handler::{JobContext, JobError, JobHandler};
pub use worker::{WorkerPool, WorkerPoolConfig};

use chrono::Utc;
use rand::RngExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::Result;
use crate::database::models::TaskDbModel;
use crate::database::repositories::TaskRepository;

/// Queue for transcoding-class jobs (CPU-heavy subprocess work).
pub const QUEUE_VIDEO: &str = "video_processing";
/// Queue for indexing and notification fan-out jobs, kept separate so a
/// transcode backlog cannot starve them.
pub const QUEUE_MAINTENANCE: &str = "maintenance";

/// Total attempt budget per job type (1 initial + N retries).
fn route(job_type: &str) -> (&'static str, i64) {
    match job_type {
        "process_video" => (QUEUE_VIDEO, 4),
        "generate_preview" => (QUEUE_VIDEO, 3),
        _ => (QUEUE_MAINTENANCE, 4),
    }
}

/// Retry backoff policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt; doubles per subsequent attempt.
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to every delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_jitter: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempts + 1`, given `attempts` completed.
    pub fn backoff(&self, attempts: i64) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 16) as u32;
        let base = self.base_delay.saturating_mul(2u32.saturating_pow(exponent));
        let jitter_ms = if self.max_jitter.is_zero() {
            0
        } else {
            rand::rng().random_range(0..=self.max_jitter.as_millis() as u64)
        };
        base + Duration::from_millis(jitter_ms)
    }
}

/// Handle returned from `enqueue`, identifying the accepted job.
#[derive(Debug, Clone, Serialize)]
pub struct JobHandle {
    pub id: String,
    pub job_type: String,
    pub queue: String,
}

/// What became of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back on the queue with a backoff-delayed run_at.
    Rescheduled,
    /// Dead-lettered; no further automatic attempts.
    DeadLettered,
}

/// The durable task queue.
pub struct TaskQueue {
    repo: Arc<dyn TaskRepository>,
    notify: Arc<Notify>,
    retry: RetryPolicy,
}

impl TaskQueue {
    pub fn new(repo: Arc<dyn TaskRepository>) -> Self {
        Self::with_retry_policy(repo, RetryPolicy::default())
    }

    pub fn with_retry_policy(repo: Arc<dyn TaskRepository>, retry: RetryPolicy) -> Self {
        Self {
            repo,
            notify: Arc::new(Notify::new()),
            retry,
        }
    }

    /// Notifier workers wait on between polls.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub fn repository(&self) -> Arc<dyn TaskRepository> {
        self.repo.clone()
    }

    /// Accept a job. Returns immediately; execution happens on a worker.
    pub async fn enqueue<P: Serialize>(&self, job_type: &str, payload: &P) -> Result<JobHandle> {
        let (queue, max_attempts) = route(job_type);
        let task = TaskDbModel::new(queue, job_type, serde_json::to_string(payload)?, max_attempts);
        self.repo.create(&task).await?;
        self.notify.notify_waiters();

        info!(task_id = %task.id, job_type, queue, "Job enqueued");
        Ok(JobHandle {
            id: task.id,
            job_type: job_type.to_string(),
            queue: queue.to_string(),
        })
    }

    /// Claim the next runnable task on a queue.
    pub async fn claim(&self, queue: &str) -> Result<Option<TaskDbModel>> {
        self.repo.claim_next(queue).await
    }

    /// Mark a task completed.
    pub async fn complete(&self, id: &str) -> Result<()> {
        self.repo.complete(id).await
    }

    /// Record a failed attempt and decide its fate.
    ///
    /// Permanent failures and exhausted budgets dead-letter; everything else
    /// is rescheduled with backoff. Dead-lettering is logged, never silent.
    pub async fn handle_failure(
        &self,
        task: &TaskDbModel,
        error: &JobError,
    ) -> Result<FailureOutcome> {
        let exhausted = task.attempts >= task.max_attempts;
        if error.is_permanent() || exhausted {
            warn!(
                task_id = %task.id,
                job_type = %task.job_type,
                attempts = task.attempts,
                error = %error,
                "Job dead-lettered"
            );
            self.repo.fail(&task.id, &error.to_string()).await?;
            return Ok(FailureOutcome::DeadLettered);
        }

        let delay = self.retry.backoff(task.attempts);
        let run_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        warn!(
            task_id = %task.id,
            job_type = %task.job_type,
            attempt = task.attempts,
            retry_in_secs = delay.as_secs(),
            error = %error,
            "Job attempt failed, rescheduling"
        );
        self.repo.reschedule(&task.id, run_at, &error.to_string()).await?;
        Ok(FailureOutcome::Rescheduled)
    }

    /// Reset tasks left `running` by a crashed or restarted worker process.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let reset = self.repo.reset_running().await?;
        if reset > 0 {
            info!("Requeued {} interrupted task(s)", reset);
            self.notify.notify_waiters();
        }
        Ok(reset)
    }

    /// Operator action: retry a dead-lettered task from scratch.
    pub async fn requeue_dead_letter(&self, id: &str) -> Result<TaskDbModel> {
        let task = self.repo.requeue(id).await?;
        self.notify.notify_waiters();
        Ok(task)
    }
}
