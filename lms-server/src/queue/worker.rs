//! Worker pool pulling from the durable queue.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::{JobContext, JobError, JobHandler};
use super::{FailureOutcome, TaskQueue};

/// Configuration for a worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent jobs.
    pub max_workers: usize,
    /// Soft time limit: a warning is logged when an attempt runs past this.
    pub soft_time_limit_secs: u64,
    /// Hard time limit: the attempt is cancelled and counted as a retryable
    /// failure.
    pub hard_time_limit_secs: u64,
    /// Poll interval in milliseconds (fallback when no notify arrives).
    pub poll_interval_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            soft_time_limit_secs: 25 * 60,
            hard_time_limit_secs: 30 * 60,
            poll_interval_ms: 500,
        }
    }
}

/// A worker pool bound to one named queue.
///
/// Transcoding runs as subprocess work inside these workers, bounded by
/// `max_workers`, so CPU-heavy jobs never occupy the request-serving runtime
/// beyond the pool's budget.
pub struct WorkerPool {
    queue_name: &'static str,
    config: WorkerPoolConfig,
    semaphore: Arc<Semaphore>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new(queue_name: &'static str) -> Self {
        Self::with_config(queue_name, WorkerPoolConfig::default())
    }

    pub fn with_config(queue_name: &'static str, config: WorkerPoolConfig) -> Self {
        Self {
            queue_name,
            semaphore: Arc::new(Semaphore::new(config.max_workers)),
            config,
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Start the worker pool.
    pub fn start(&self, queue: Arc<TaskQueue>, handlers: Vec<Arc<dyn JobHandler>>) {
        let queue_name = self.queue_name;
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let soft_limit = Duration::from_secs(self.config.soft_time_limit_secs);
        let hard_limit = Duration::from_secs(self.config.hard_time_limit_secs);

        info!(
            "Starting '{}' worker pool with {} max workers",
            queue_name, self.config.max_workers
        );

        let mut tasks = self.tasks.lock();
        if let Some(ref mut join_set) = *tasks {
            for i in 0..self.config.max_workers {
                let semaphore = self.semaphore.clone();
                let cancellation_token = self.cancellation_token.clone();
                let queue = queue.clone();
                let handlers = handlers.clone();
                let notifier = queue.notifier();

                join_set.spawn(async move {
                    debug!("'{}' worker {} started", queue_name, i);

                    loop {
                        if cancellation_token.is_cancelled() {
                            debug!("'{}' worker {} shutting down", queue_name, i);
                            break;
                        }

                        // Wait for a wake-up or fall back to polling; retries
                        // scheduled in the future only surface via the poll.
                        tokio::select! {
                            _ = cancellation_token.cancelled() => break,
                            _ = notifier.notified() => {}
                            _ = tokio::time::sleep(poll_interval) => {}
                        }

                        let permit = match semaphore.clone().try_acquire_owned() {
                            Ok(p) => p,
                            Err(_) => continue,
                        };

                        let task = match queue.claim(queue_name).await {
                            Ok(Some(task)) => task,
                            Ok(None) => {
                                drop(permit);
                                continue;
                            }
                            Err(e) => {
                                error!("Error claiming task from '{}': {}", queue_name, e);
                                drop(permit);
                                continue;
                            }
                        };

                        let handler = handlers.iter().find(|h| h.can_handle(&task.job_type));
                        let Some(handler) = handler else {
                            warn!(
                                "No handler for job type '{}'. Available: {:?}",
                                task.job_type,
                                handlers.iter().map(|h| h.name()).collect::<Vec<_>>()
                            );
                            let _ = queue
                                .handle_failure(&task, &JobError::permanent("no handler registered"))
                                .await;
                            drop(permit);
                            continue;
                        };

                        let ctx = JobContext::new(task.clone());
                        debug!(
                            "'{}' worker {} running task {} ({}) attempt {}/{}",
                            queue_name, i, task.id, task.job_type, task.attempts, task.max_attempts
                        );

                        // Soft-limit watchdog: warns, never kills.
                        let watchdog = {
                            let task_id = task.id.clone();
                            let job_type = task.job_type.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(soft_limit).await;
                                warn!(
                                    task_id = %task_id,
                                    job_type = %job_type,
                                    "Job exceeded soft time limit ({}s)",
                                    soft_limit.as_secs()
                                );
                            })
                        };

                        let result = tokio::time::timeout(hard_limit, handler.run(&ctx)).await;
                        watchdog.abort();

                        let attempt_error = match result {
                            Ok(Ok(())) => {
                                if let Err(e) = queue.complete(&task.id).await {
                                    error!("Failed to mark task {} completed: {}", task.id, e);
                                }
                                None
                            }
                            Ok(Err(e)) => Some(e),
                            Err(_) => Some(JobError::retryable(format!(
                                "hard time limit exceeded ({}s)",
                                hard_limit.as_secs()
                            ))),
                        };

                        if let Some(e) = attempt_error {
                            match queue.handle_failure(&task, &e).await {
                                Ok(FailureOutcome::DeadLettered) => {
                                    handler.on_exhausted(&ctx, &e).await;
                                }
                                Ok(FailureOutcome::Rescheduled) => {}
                                Err(store_err) => {
                                    error!(
                                        "Failed to record failure for task {}: {}",
                                        task.id, store_err
                                    );
                                }
                            }
                        }

                        drop(permit);
                    }
                });
            }
        }
    }

    /// Stop the worker pool and wait for in-flight jobs to wind down.
    pub async fn stop(&self) {
        info!("Stopping '{}' worker pool", self.queue_name);
        self.cancellation_token.cancel();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!("'{}' worker pool stopped", self.queue_name);
    }

    pub fn queue_name(&self) -> &'static str {
        self.queue_name
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}
