//! The capability surface handlers run against.
//!
//! One handler body can serve an HTTP route, a queue consumer, a batch
//! consumer, a timer, or a fanned-out worker: each trigger builds its own
//! [`Context`] variant, and operations that make no sense for a trigger fall
//! back to empty values or no-ops instead of failing.

mod async_task;
mod batch;
mod consumer;
mod http;
mod ptask;
mod scheduler;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Local};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::info;

pub use async_task::AsyncTaskContext;
pub use batch::BatchConsumerContext;
pub use consumer::ConsumerContext;
pub use http::HttpContext;
pub use ptask::ParallelTaskContext;
pub use scheduler::SchedulerContext;

use crate::error::{ServiceError, ServiceResult};
use crate::requester::Requester;
use crate::service::resources::Resources;
use crate::traits::{Cache, MessageQueue, Producer};

/// Which trigger produced a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Http,
    Consumer,
    BatchConsumer,
    Scheduler,
    AsyncTask,
    ParallelTask,
}

impl ContextKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Consumer => "consumer",
            Self::BatchConsumer => "batch-consumer",
            Self::Scheduler => "scheduler",
            Self::AsyncTask => "async-task",
            Self::ParallelTask => "ptask-worker",
        }
    }
}

/// Operations available to every handler.
///
/// Only [`kind`](Context::kind) and [`resources`](Context::resources) are
/// required; each variant overrides the operations its trigger supports.
#[async_trait]
pub trait Context: Send + Sync {
    fn kind(&self) -> ContextKind;

    /// Clients shared with the runtime that built this context.
    fn resources(&self) -> &Resources;

    /// Emits an `info` event tagged with the context kind.
    fn log(&self, message: &str) {
        info!(context = self.kind().as_str(), "{message}");
    }

    /// Path parameter `name`, or `""`.
    fn param(&self, _name: &str) -> String {
        String::new()
    }

    /// Query-string parameter `name`, or `""`.
    fn query_param(&self, _name: &str) -> String {
        String::new()
    }

    /// The single payload that triggered this call, or `""`.
    fn read_input(&self) -> String {
        String::new()
    }

    /// Every payload of a batch, or empty.
    fn read_inputs(&self) -> Vec<String> {
        Vec::new()
    }

    /// Reports the handler's result to whoever is waiting for it.
    ///
    /// # Errors
    ///
    /// Variants that persist the response surface storage failures.
    async fn respond(&self, _code: StatusCode, _data: Value) -> ServiceResult {
        Ok(())
    }

    /// Local wall-clock time.
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    /// # Errors
    ///
    /// Fails when the cache cannot be opened.
    fn cacher(&self) -> ServiceResult<Arc<dyn Cache>> {
        Ok(self.resources().cache()?)
    }

    /// # Errors
    ///
    /// Fails when the producer cannot be opened.
    fn producer(&self) -> ServiceResult<Arc<dyn Producer>> {
        Ok(self.resources().producer()?)
    }

    /// # Errors
    ///
    /// Fails when the broker cannot be opened.
    fn queue(&self) -> ServiceResult<Arc<dyn MessageQueue>> {
        Ok(self.resources().queue()?)
    }

    /// An outbound HTTP client rooted at `base_url`.
    fn requester(&self, base_url: &str, timeout: Duration) -> Requester {
        Requester::new(base_url, timeout)
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// A user handler. Any `Fn(Arc<dyn Context>) -> impl Future<Output = ServiceResult>`
/// qualifies.
pub trait ServiceHandler: Send + Sync + 'static {
    fn call(&self, ctx: Arc<dyn Context>) -> BoxFuture<'static, ServiceResult>;
}

impl<F, Fut> ServiceHandler for F
where
    F: Fn(Arc<dyn Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
{
    fn call(&self, ctx: Arc<dyn Context>) -> BoxFuture<'static, ServiceResult> {
        Box::pin(self(ctx))
    }
}

pub type SharedHandler = Arc<dyn ServiceHandler>;
