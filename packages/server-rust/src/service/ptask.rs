//! Parallel-task fan-out and fan-in.
//!
//! [`ParallelTaskCoordinator`] is the request side: it writes a fresh
//! [`Task`] record and publishes one [`WorkerMessage`] per worker.
//! [`CompletionMerger`] is the worker side: it folds one worker's result into
//! the shared record with an optimistic read / mutate / compare / write loop,
//! so concurrent completions never overwrite each other.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use rand::Rng;
use relay_core::{parse_worker_count, task_key, Task, TaskError, WorkerMessage, RECORD_TTL};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::context::{Context, SharedHandler};
use crate::error::{CacheError, QueueError, ServiceError};
use crate::telemetry::{PTASK_MERGE_CONFLICTS, PTASK_MERGE_EXHAUSTED};
use crate::traits::{Cache, CacheExt, Producer, ProducerExt};

/// Upper bound on optimistic merge attempts for one worker result.
pub const MAX_MERGE_ATTEMPTS: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum PTaskError {
    #[error("task_id in query param is required")]
    MissingTaskId,
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("task record is not valid JSON: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("merging into {key} lost {attempts} optimistic checks in a row")]
    MergeExhausted { key: String, attempts: usize },
}

impl From<PTaskError> for ServiceError {
    fn from(err: PTaskError) -> Self {
        match err {
            PTaskError::MissingTaskId => ServiceError::BadRequest(err.to_string()),
            PTaskError::Cache(e) => ServiceError::Cache(e),
            PTaskError::Queue(e) => ServiceError::Queue(e),
            PTaskError::Codec(e) => ServiceError::Internal(e.into()),
            PTaskError::MergeExhausted { .. } => ServiceError::Internal(anyhow::anyhow!(err)),
        }
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Result of [`ParallelTaskCoordinator::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new task record was written and `workers` messages published.
    Dispatched { key: String, workers: usize },
    /// The task is still running; nothing was published.
    AlreadyRunning { key: String },
}

pub struct ParallelTaskCoordinator {
    cache: Arc<dyn Cache>,
    producer: Arc<dyn Producer>,
    topic: String,
}

impl ParallelTaskCoordinator {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>, producer: Arc<dyn Producer>, topic: impl Into<String>) -> Self {
        Self {
            cache,
            producer,
            topic: topic.into(),
        }
    }

    /// Starts task `task_id` with `worker_count` workers unless it is
    /// already running.
    ///
    /// The record is written with a compare against the value read, so of
    /// several concurrent submits only one publishes. Never waits for the
    /// workers.
    ///
    /// # Errors
    ///
    /// [`PTaskError::MissingTaskId`] for an empty id; cache and queue
    /// failures otherwise.
    pub async fn submit(
        &self,
        task_id: &str,
        worker_count: usize,
        input: &str,
    ) -> Result<SubmitOutcome, PTaskError> {
        if task_id.is_empty() {
            return Err(PTaskError::MissingTaskId);
        }
        let key = task_key(task_id);

        let raw = self.cache.get(&key).await?.filter(|raw| !raw.is_empty());
        if let Some(raw) = raw.as_deref() {
            let existing: Task = serde_json::from_str(raw)?;
            if existing.is_running() {
                debug!(task = %key, "task already running; resubmit ignored");
                return Ok(SubmitOutcome::AlreadyRunning { key });
            }
        }

        let task = Task::new(&key, worker_count);
        let record = serde_json::to_string(&task)?;
        if !self
            .cache
            .set_if_unchanged(&key, raw.as_deref(), &record, RECORD_TTL)
            .await?
        {
            debug!(task = %key, "concurrent submit started the task first");
            return Ok(SubmitOutcome::AlreadyRunning { key });
        }

        for worker in &task.workers {
            let message = WorkerMessage {
                task_id: key.clone(),
                worker_id: worker.worker_id.clone(),
                input: input.to_owned(),
            };
            self.producer
                .send_json(&self.topic, &worker.worker_id, &message)
                .await?;
        }

        info!(task = %key, workers = task.workers.len(), topic = %self.topic, "task dispatched");
        Ok(SubmitOutcome::Dispatched {
            key,
            workers: task.workers.len(),
        })
    }

    /// Reads the current record. `None` means the task never started or
    /// its record expired.
    ///
    /// # Errors
    ///
    /// [`PTaskError::MissingTaskId`] for an empty id; cache failures.
    pub async fn status(&self, task_id: &str) -> Result<Option<Task>, PTaskError> {
        read_task(self.cache.as_ref(), task_id).await
    }
}

async fn read_task(cache: &dyn Cache, task_id: &str) -> Result<Option<Task>, PTaskError> {
    if task_id.is_empty() {
        return Err(PTaskError::MissingTaskId);
    }
    Ok(cache.get_json(&task_key(task_id)).await?)
}

/// `POST ?task_id=&worker_count=` handler. The body is every worker's input.
///
/// Answers `{"task_id": ..}` whether or not the task was already running.
pub(crate) fn submit_endpoint(topic: String) -> SharedHandler {
    Arc::new(move |ctx: Arc<dyn Context>| {
        let topic = topic.clone();
        async move {
            let task_id = ctx.query_param("task_id");
            let worker_count = ctx.query_param("worker_count");
            let workers = parse_worker_count(Some(worker_count.as_str()));
            ParallelTaskCoordinator::new(ctx.cacher()?, ctx.producer()?, topic)
                .submit(&task_id, workers, &ctx.read_input())
                .await?;
            ctx.respond(StatusCode::OK, json!({ "task_id": task_id }))
                .await
        }
    })
}

/// `GET ?task_id=` handler. A task that never started reads as `{}`.
pub(crate) fn status_endpoint() -> SharedHandler {
    Arc::new(|ctx: Arc<dyn Context>| async move {
        let task = read_task(ctx.cacher()?.as_ref(), &ctx.query_param("task_id")).await?;
        let body = match task {
            Some(task) => serde_json::to_value(task)?,
            None => json!({}),
        };
        ctx.respond(StatusCode::OK, body).await
    })
}

// ---------------------------------------------------------------------------
// Fan-in
// ---------------------------------------------------------------------------

/// How a merge ended when it did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The record was written; `complete` tells whether this was the last worker.
    Committed { complete: bool, attempts: usize },
    /// Another writer already finished the task; this result arrived late.
    AlreadyComplete,
    /// The record has no slot for this worker.
    WorkerNotFound,
    /// No record exists (never created or expired).
    TaskMissing,
}

pub struct CompletionMerger {
    cache: Arc<dyn Cache>,
    max_attempts: usize,
}

impl CompletionMerger {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            max_attempts: MAX_MERGE_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Marks `worker_id` complete in the record under `key`.
    ///
    /// Each attempt reads the raw record, applies the change locally, and
    /// writes back only if the raw value is still what was read. A lost
    /// check retries from a fresh read after a short jittered pause.
    ///
    /// # Errors
    ///
    /// [`PTaskError::MergeExhausted`] after `max_attempts` lost checks;
    /// cache and decoding failures.
    pub async fn merge(
        &self,
        key: &str,
        worker_id: &str,
        code: u16,
        response: Value,
    ) -> Result<MergeOutcome, PTaskError> {
        for attempt in 1..=self.max_attempts {
            let raw = self.cache.get(key).await?.filter(|r| !r.is_empty());
            let Some(current) = raw.as_deref() else {
                warn!(task = key, worker = worker_id, "task record missing");
                return Ok(MergeOutcome::TaskMissing);
            };

            let mut task: Task = serde_json::from_str(current)?;
            if task.is_complete() {
                return Ok(MergeOutcome::AlreadyComplete);
            }
            if let Err(TaskError::WorkerNotFound(id)) =
                task.complete_worker(worker_id, code, response.clone())
            {
                warn!(task = key, worker = %id, "worker is not part of task");
                return Ok(MergeOutcome::WorkerNotFound);
            }

            let updated = serde_json::to_string(&task)?;
            if self
                .cache
                .set_if_unchanged(key, Some(current), &updated, RECORD_TTL)
                .await?
            {
                return Ok(MergeOutcome::Committed {
                    complete: task.is_complete(),
                    attempts: attempt,
                });
            }

            metrics::counter!(PTASK_MERGE_CONFLICTS).increment(1);
            debug!(task = key, worker = worker_id, attempt, "task record changed underneath; retrying");
            tokio::time::sleep(backoff(attempt)).await;
        }

        metrics::counter!(PTASK_MERGE_EXHAUSTED).increment(1);
        Err(PTaskError::MergeExhausted {
            key: key.to_owned(),
            attempts: self.max_attempts,
        })
    }
}

/// Random pause in `0..=2*min(attempt, 10)` milliseconds.
fn backoff(attempt: usize) -> Duration {
    let ceiling = 2 * u64::try_from(attempt.min(10)).unwrap_or(10);
    Duration::from_millis(rand::rng().random_range(0..=ceiling))
}
