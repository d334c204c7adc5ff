//! Job handler trait and related types.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::database::models::TaskDbModel;

/// Failure classification for a job attempt.
///
/// Retryable failures go back on the queue with backoff until the attempt
/// budget runs out; permanent failures dead-letter immediately since
/// re-running a job against the same malformed input cannot succeed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Retryable(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

impl JobError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

impl From<crate::Error> for JobError {
    fn from(err: crate::Error) -> Self {
        // Infrastructure errors (store, DB, network) are worth retrying.
        Self::Retryable(err.to_string())
    }
}

/// Execution context handed to a job handler.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub task: TaskDbModel,
}

impl JobContext {
    pub fn new(task: TaskDbModel) -> Self {
        Self { task }
    }

    /// Deserialize the task payload.
    ///
    /// A payload that doesn't parse can never parse, so this is a permanent
    /// failure.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_str(&self.task.payload)
            .map_err(|e| JobError::permanent(format!("invalid payload: {e}")))
    }
}

/// Trait for background job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Job types this handler executes.
    fn job_types(&self) -> Vec<&'static str>;

    /// Check if this handler can execute a job type.
    fn can_handle(&self, job_type: &str) -> bool {
        self.job_types().contains(&job_type)
    }

    /// Execute one attempt.
    ///
    /// # Cancel Safety
    ///
    /// The worker pool cancels this future at the hard time limit and on
    /// shutdown. Implementations must not leave partial external state
    /// behind that a re-run cannot overwrite.
    async fn run(&self, ctx: &JobContext) -> Result<(), JobError>;

    /// Called once when the task is dead-lettered, after the final attempt.
    async fn on_exhausted(&self, _ctx: &JobContext, _error: &JobError) {}

    /// Handler name for logs.
    fn name(&self) -> &'static str;
}
