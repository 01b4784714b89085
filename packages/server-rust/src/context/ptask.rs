use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{Context, ContextKind};
use crate::error::ServiceResult;
use crate::service::ptask::{CompletionMerger, MergeOutcome, PTaskError};
use crate::service::resources::Resources;

/// Context for one fanned-out unit of a parallel task.
///
/// `respond` merges this worker's result into the shared task record.
/// Losing the optimistic check past the retry cap is logged, not returned:
/// the worker has nobody to report it to.
pub struct ParallelTaskContext {
    resources: Arc<Resources>,
    task_key: String,
    worker_id: String,
    input: String,
}

impl ParallelTaskContext {
    #[must_use]
    pub fn new(
        resources: Arc<Resources>,
        task_key: String,
        worker_id: String,
        input: String,
    ) -> Self {
        Self {
            resources,
            task_key,
            worker_id,
            input,
        }
    }

    #[must_use]
    pub fn task_key(&self) -> &str {
        &self.task_key
    }

    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }
}

#[async_trait]
impl Context for ParallelTaskContext {
    fn kind(&self) -> ContextKind {
        ContextKind::ParallelTask
    }

    fn resources(&self) -> &Resources {
        &self.resources
    }

    fn read_input(&self) -> String {
        self.input.clone()
    }

    async fn respond(&self, code: StatusCode, data: Value) -> ServiceResult {
        let merger = CompletionMerger::new(self.cacher()?);
        match merger
            .merge(&self.task_key, &self.worker_id, code.as_u16(), data)
            .await
        {
            Ok(MergeOutcome::Committed { complete, attempts }) => {
                debug!(task = %self.task_key, worker = %self.worker_id, complete, attempts, "worker result merged");
                Ok(())
            }
            Ok(outcome) => {
                warn!(task = %self.task_key, worker = %self.worker_id, ?outcome, "worker result not merged");
                Ok(())
            }
            Err(PTaskError::MergeExhausted { attempts, .. }) => {
                error!(task = %self.task_key, worker = %self.worker_id, attempts, "gave up merging worker result");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
