//! Request/response correlation for long-running HTTP work.
//!
//! The request side stores a `processing` placeholder under a fresh
//! reference, publishes `{ref, input}` and answers with the reference at
//! once. The background consumer runs the handler through an
//! [`AsyncTaskContext`](crate::context::AsyncTaskContext), whose `respond`
//! overwrites the placeholder. Clients poll the reference until it reads
//! `success`.

use std::sync::Arc;

use axum::http::StatusCode;
use relay_core::{generate_id, AsyncTaskMessage, AsyncTaskStatus, ASYNC_REF_PREFIX, RECORD_TTL};
use serde_json::json;
use tracing::debug;

use crate::context::{Context, SharedHandler};
use crate::error::{ServiceError, ServiceResult};
use crate::traits::{Cache, CacheExt, Producer, ProducerExt};

pub struct AsyncTaskCorrelator {
    cache: Arc<dyn Cache>,
    producer: Arc<dyn Producer>,
    topic: String,
}

impl AsyncTaskCorrelator {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>, producer: Arc<dyn Producer>, topic: impl Into<String>) -> Self {
        Self {
            cache,
            producer,
            topic: topic.into(),
        }
    }

    /// Queues `input` for the background handler and returns its reference.
    ///
    /// # Errors
    ///
    /// Cache or queue failures. A placeholder written before a failed
    /// publish is left to expire.
    pub async fn accept(&self, input: &str) -> ServiceResult<String> {
        let reference = format!("{ASYNC_REF_PREFIX}{}", generate_id());
        self.cache
            .set_json(&reference, &AsyncTaskStatus::processing(), RECORD_TTL)
            .await?;
        let message = AsyncTaskMessage {
            reference: reference.clone(),
            input: input.to_owned(),
        };
        self.producer.send_json(&self.topic, "", &message).await?;
        debug!(%reference, topic = %self.topic, "async task accepted");
        Ok(reference)
    }

    /// Current status of `reference`.
    ///
    /// # Errors
    ///
    /// [`ServiceError::BadRequest`] for an empty reference,
    /// [`ServiceError::NotFound`] for an unknown or expired one.
    pub async fn poll(&self, reference: &str) -> ServiceResult<AsyncTaskStatus> {
        poll_status(self.cache.as_ref(), reference).await
    }
}

async fn poll_status(cache: &dyn Cache, reference: &str) -> ServiceResult<AsyncTaskStatus> {
    if reference.is_empty() {
        return Err(ServiceError::BadRequest("ref in query param is required".into()));
    }
    let status: Option<AsyncTaskStatus> = cache.get_json(reference).await?;
    status.ok_or_else(|| ServiceError::NotFound(format!("unknown ref {reference}")))
}

/// `POST`/`PUT` handler: queues the request body and answers `{"ref": ..}`.
pub(crate) fn accept_endpoint(topic: String) -> SharedHandler {
    Arc::new(move |ctx: Arc<dyn Context>| {
        let topic = topic.clone();
        async move {
            let correlator = AsyncTaskCorrelator::new(ctx.cacher()?, ctx.producer()?, topic);
            let reference = correlator.accept(&ctx.read_input()).await?;
            ctx.respond(StatusCode::OK, json!({ "ref": reference })).await
        }
    })
}

/// `GET` handler: answers the cached status of `?ref=`.
pub(crate) fn poll_endpoint() -> SharedHandler {
    Arc::new(|ctx: Arc<dyn Context>| async move {
        let status = poll_status(ctx.cacher()?.as_ref(), &ctx.query_param("ref")).await?;
        ctx.respond(StatusCode::OK, serde_json::to_value(status)?).await
    })
}

#[cfg(test)]
mod tests {
    use relay_core::AsyncStatus;
    use serde_json::json;

    use super::*;
    use crate::backends::MemoryBackends;

    fn correlator(backends: &MemoryBackends) -> AsyncTaskCorrelator {
        AsyncTaskCorrelator::new(backends.cache(), backends.broker(), "register")
    }

    #[tokio::test]
    async fn accept_stores_placeholder_and_publishes_envelope() {
        let backends = MemoryBackends::new();
        let reference = correlator(&backends).accept("{\"name\":\"a\"}").await.unwrap();
        assert!(reference.starts_with("atask-"));

        let status = correlator(&backends).poll(&reference).await.unwrap();
        assert_eq!(status.status, AsyncStatus::Processing);
        assert!(!status.is_done());

        let published = backends.broker().payloads("register");
        assert_eq!(published.len(), 1);
        let message: AsyncTaskMessage = serde_json::from_str(&published[0]).unwrap();
        assert_eq!(message.reference, reference);
        assert_eq!(message.input, "{\"name\":\"a\"}");
    }

    #[tokio::test]
    async fn poll_sees_final_write() {
        let backends = MemoryBackends::new();
        let correlator = correlator(&backends);
        let reference = correlator.accept("x").await.unwrap();
        backends
            .cache()
            .set_json(&reference, &AsyncTaskStatus::success(200, json!({"ok": true})), RECORD_TTL)
            .await
            .unwrap();
        let status = correlator.poll(&reference).await.unwrap();
        assert!(status.is_done());
        assert_eq!(status.data, json!({"ok": true}));
    }

    #[tokio::test]
    async fn references_are_unique() {
        let backends = MemoryBackends::new();
        let correlator = correlator(&backends);
        let a = correlator.accept("").await.unwrap();
        let b = correlator.accept("").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn missing_and_unknown_refs() {
        let backends = MemoryBackends::new();
        let correlator = correlator(&backends);
        assert!(matches!(
            correlator.poll("").await,
            Err(ServiceError::BadRequest(_))
        ));
        assert!(matches!(
            correlator.poll("atask-nope").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
