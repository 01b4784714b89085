use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use relay_core::{AsyncTaskStatus, RECORD_TTL};
use serde_json::Value;

use super::{Context, ContextKind};
use crate::error::ServiceResult;
use crate::service::resources::Resources;
use crate::traits::CacheExt;

/// Context for the background half of an async task.
///
/// `respond` overwrites the `processing` placeholder stored under the task's
/// reference with the final result. There is one writer per reference.
pub struct AsyncTaskContext {
    resources: Arc<Resources>,
    reference: String,
    input: String,
}

impl AsyncTaskContext {
    #[must_use]
    pub fn new(resources: Arc<Resources>, reference: String, input: String) -> Self {
        Self {
            resources,
            reference,
            input,
        }
    }

    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

#[async_trait]
impl Context for AsyncTaskContext {
    fn kind(&self) -> ContextKind {
        ContextKind::AsyncTask
    }

    fn resources(&self) -> &Resources {
        &self.resources
    }

    fn read_input(&self) -> String {
        self.input.clone()
    }

    async fn respond(&self, code: StatusCode, data: Value) -> ServiceResult {
        let status = AsyncTaskStatus::success(code.as_u16(), data);
        self.cacher()?
            .set_json(&self.reference, &status, RECORD_TTL)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backends::MemoryBackends;

    #[tokio::test]
    async fn respond_writes_success_under_reference() {
        let backends = MemoryBackends::new();
        let ctx = AsyncTaskContext::new(
            Arc::new(Resources::new(Arc::new(backends.clone()))),
            "atask-1".into(),
            "in".into(),
        );
        assert_eq!(ctx.reference(), "atask-1");
        assert_eq!(ctx.read_input(), "in");

        ctx.respond(StatusCode::OK, json!({"done": 1})).await.unwrap();

        let stored: AsyncTaskStatus = backends.cache().get_json("atask-1").await.unwrap().unwrap();
        assert_eq!(stored, AsyncTaskStatus::success(200, json!({"done": 1})));
    }
}
