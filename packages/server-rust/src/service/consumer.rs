//! Queue consumer loops.
//!
//! Each loop owns one subscription and processes messages strictly in
//! receipt order: the handler for one message finishes before the next read.
//! Loops end when their cancellation token fires, when a finite read timeout
//! elapses with nothing to read, or when the broker reports an error. None
//! of these outcomes affect other loops.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{AsyncTaskMessage, WorkerMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::batch::{Batch, BatchConfig, BatchEngine, BatchHandler};
use super::resources::Resources;
use crate::context::{
    AsyncTaskContext, BatchConsumerContext, Context, ConsumerContext, ContextKind,
    ParallelTaskContext, SharedHandler,
};
use crate::error::{QueueError, ServiceError};
use crate::queue::ReadTimeout;
use crate::telemetry::HANDLER_FAILURES;
use crate::traits::Subscription;

/// How message payloads are decoded before the handler sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Raw payload, delivered through a [`ConsumerContext`].
    Plain,
    /// `{ref, input}` envelope, delivered through an [`AsyncTaskContext`].
    AsyncTask,
    /// `{task_id, worker_id, input}` envelope, delivered through a
    /// [`ParallelTaskContext`].
    ParallelTask,
}

/// Where a consumer loop reads from.
#[derive(Debug, Clone)]
pub struct Subscribe {
    pub topic: String,
    pub group: String,
    pub timeout: ReadTimeout,
}

/// Why a consumer loop stopped reading.
#[derive(Debug)]
enum ReadEnd {
    Cancelled,
    Idle,
    Failed(QueueError),
}

fn log_read_end(topic: &str, end: &ReadEnd) {
    match end {
        ReadEnd::Cancelled => debug!(topic, "consumer stopped by shutdown"),
        ReadEnd::Idle => info!(topic, "consumer idle past its read timeout; exiting"),
        ReadEnd::Failed(e) => error!(topic, error = %e, "consumer read failed; exiting"),
    }
}

async fn open(resources: &Resources, source: &Subscribe) -> Result<Box<dyn Subscription>, QueueError> {
    resources
        .queue()?
        .subscribe(&source.topic, &source.group)
        .await
}

/// Reads the next payload unless the token fires first.
async fn next_payload(
    subscription: &mut dyn Subscription,
    timeout: ReadTimeout,
    token: &CancellationToken,
) -> Result<String, ReadEnd> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(ReadEnd::Cancelled),
        read = subscription.read(timeout) => match read {
            Ok(message) => Ok(message.payload),
            Err(e) if e.is_timeout() => Err(ReadEnd::Idle),
            Err(QueueError::Closed) => Err(ReadEnd::Cancelled),
            Err(e) => Err(ReadEnd::Failed(e)),
        },
    }
}

/// Builds the context a payload is delivered through.
fn build_context(
    kind: MessageKind,
    resources: &Arc<Resources>,
    payload: String,
) -> Result<Arc<dyn Context>, serde_json::Error> {
    let resources = Arc::clone(resources);
    Ok(match kind {
        MessageKind::Plain => Arc::new(ConsumerContext::new(resources, payload)),
        MessageKind::AsyncTask => {
            let message: AsyncTaskMessage = serde_json::from_str(&payload)?;
            Arc::new(AsyncTaskContext::new(
                resources,
                message.reference,
                message.input,
            ))
        }
        MessageKind::ParallelTask => {
            let message: WorkerMessage = serde_json::from_str(&payload)?;
            Arc::new(ParallelTaskContext::new(
                resources,
                message.task_id,
                message.worker_id,
                message.input,
            ))
        }
    })
}

pub(crate) fn record_failure(kind: ContextKind, source: &str, err: &ServiceError) {
    metrics::counter!(HANDLER_FAILURES, "kind" => kind.as_str()).increment(1);
    warn!(kind = kind.as_str(), source, error = %err, "handler failed");
}

/// Runs a single-message consumer until it ends.
pub(crate) async fn run_consumer(
    resources: Arc<Resources>,
    source: Subscribe,
    kind: MessageKind,
    handler: SharedHandler,
    token: CancellationToken,
) {
    let mut subscription = match open(&resources, &source).await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!(topic = %source.topic, group = %source.group, error = %e, "subscribe failed");
            return;
        }
    };
    info!(topic = %source.topic, group = %source.group, ?kind, "consumer started");

    let end = loop {
        let payload = match next_payload(subscription.as_mut(), source.timeout, &token).await {
            Ok(payload) => payload,
            Err(end) => break end,
        };
        let ctx = match build_context(kind, &resources, payload) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(topic = %source.topic, error = %e, "dropping malformed message");
                continue;
            }
        };
        let ctx_kind = ctx.kind();
        if let Err(e) = handler.call(ctx).await {
            record_failure(ctx_kind, &source.topic, &e);
        }
    };
    log_read_end(&source.topic, &end);
}

/// Delivers each flushed batch to a user handler.
struct HandlerBatch {
    resources: Arc<Resources>,
    handler: SharedHandler,
}

#[async_trait]
impl BatchHandler for HandlerBatch {
    type Item = String;

    async fn execute(&mut self, batch: &Batch<String>) -> anyhow::Result<()> {
        let ctx = BatchConsumerContext::new(Arc::clone(&self.resources), batch.items().to_vec());
        self.handler.call(Arc::new(ctx)).await?;
        Ok(())
    }
}

/// Runs a batch consumer: a reader feeding a [`BatchEngine`], plus a task
/// logging the engine's errors. Returns once all three have finished.
///
/// When the reader ends for any reason the payload channel closes and the
/// engine drains the pending batch before returning.
pub(crate) async fn run_batch_consumer(
    resources: Arc<Resources>,
    source: Subscribe,
    config: BatchConfig,
    handler: SharedHandler,
    token: CancellationToken,
) {
    let mut subscription = match open(&resources, &source).await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!(topic = %source.topic, group = %source.group, error = %e, "subscribe failed");
            return;
        }
    };
    info!(
        topic = %source.topic,
        group = %source.group,
        size = config.size,
        timeout = ?config.timeout,
        "batch consumer started"
    );

    let (tx, rx) = mpsc::channel::<String>(config.size);
    let (err_tx, mut err_rx) = mpsc::unbounded_channel();

    let topic = source.topic.clone();
    let reader = async move {
        let end = loop {
            match next_payload(subscription.as_mut(), source.timeout, &token).await {
                Ok(payload) => {
                    if tx.send(payload).await.is_err() {
                        break ReadEnd::Cancelled;
                    }
                }
                Err(end) => break end,
            }
        };
        log_read_end(&source.topic, &end);
        // Dropping `tx` closes the engine's input.
    };

    let engine = BatchEngine::run(config, HandlerBatch { resources, handler }, rx, err_tx);

    let errors = async move {
        while let Some(e) = err_rx.recv().await {
            warn!(kind = ContextKind::BatchConsumer.as_str(), topic = %topic, error = %e, "batch failed");
        }
    };

    tokio::join!(reader, engine, errors);
}
