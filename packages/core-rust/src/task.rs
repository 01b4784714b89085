//! Parallel-task aggregate record.
//!
//! A [`Task`] is shared through the cache by one coordinator and N worker
//! processes. Its overall status is `complete` exactly when every worker
//! record is `complete`; [`Task::complete_worker`] is the only mutation that
//! can move it there.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::naming::generate_id;

/// Prefix applied to caller-supplied task ids to form the cache key.
pub const TASK_KEY_PREFIX: &str = "ptask-";

/// Worker count used when the caller omits or garbles `worker_count`.
pub const DEFAULT_WORKER_COUNT: usize = 3;

/// Largest fan-out a single task may request.
pub const MAX_WORKER_COUNT: usize = 1000;

/// Expiry applied to task and async-task records on every write.
pub const RECORD_TTL: Duration = Duration::from_secs(30 * 60);

/// Returns the cache key for a caller-supplied task id.
#[must_use]
pub fn task_key(task_id: &str) -> String {
    format!("{TASK_KEY_PREFIX}{task_id}")
}

/// Parses the optional `worker_count` parameter.
///
/// Absent, non-numeric, zero and over-[`MAX_WORKER_COUNT`] values fall back
/// to [`DEFAULT_WORKER_COUNT`].
#[must_use]
pub fn parse_worker_count(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| (1..=MAX_WORKER_COUNT).contains(n))
        .unwrap_or(DEFAULT_WORKER_COUNT)
}

/// Lifecycle of a task or one of its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Running,
    Complete,
}

/// One worker's slot in a [`Task`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub response: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerRecord {
    /// A running record with the given id and no result yet.
    #[must_use]
    pub fn running(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            status: RunStatus::Running,
            response: Value::Null,
            code: None,
            error: None,
        }
    }
}

/// Errors raised while mutating a [`Task`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("worker {0} is not part of this task")]
    WorkerNotFound(String),
}

/// The parallel-task aggregate stored under [`task_key`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Task {
    pub status: RunStatus,
    #[serde(default)]
    pub workers: Vec<WorkerRecord>,
}

impl Task {
    /// Builds a running task with `worker_count` freshly-identified workers.
    ///
    /// Worker ids are `<key>-<random>` so they stay unique across resubmits.
    /// `worker_count` is capped at [`MAX_WORKER_COUNT`].
    #[must_use]
    pub fn new(key: &str, worker_count: usize) -> Self {
        let workers = (0..worker_count.min(MAX_WORKER_COUNT))
            .map(|_| WorkerRecord::running(format!("{key}-{}", generate_id())))
            .collect();
        Self {
            status: RunStatus::Running,
            workers,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }

    /// Marks one worker complete and recomputes the overall status.
    ///
    /// A failing `code` (4xx/5xx) still completes the worker; the failure is
    /// recorded in its `error` field.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::WorkerNotFound`] when `worker_id` has no record;
    /// the task is left untouched in that case.
    pub fn complete_worker(
        &mut self,
        worker_id: &str,
        code: u16,
        response: Value,
    ) -> Result<(), TaskError> {
        let worker = self
            .workers
            .iter_mut()
            .find(|w| w.worker_id == worker_id)
            .ok_or_else(|| TaskError::WorkerNotFound(worker_id.to_owned()))?;

        worker.status = RunStatus::Complete;
        worker.code = Some(code);
        worker.response = response;
        worker.error = (code >= 400).then(|| format!("worker responded with status {code}"));

        if !self.workers.is_empty() && self.workers.iter().all(|w| w.status == RunStatus::Complete) {
            self.status = RunStatus::Complete;
        }
        Ok(())
    }

    /// Number of workers still running.
    #[must_use]
    pub fn pending_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.status == RunStatus::Running)
            .count()
    }
}
