use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use parking_lot::Mutex;
use serde_json::Value;

use super::{Context, ContextKind};
use crate::error::ServiceResult;
use crate::service::resources::Resources;

/// Context for an HTTP request.
///
/// `respond` records the status and JSON body; the dispatcher turns the
/// recorded value into the HTTP response once the handler returns.
pub struct HttpContext {
    resources: Arc<Resources>,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    body: String,
    response: Mutex<Option<(StatusCode, Value)>>,
}

impl HttpContext {
    #[must_use]
    pub fn new(
        resources: Arc<Resources>,
        params: HashMap<String, String>,
        query: HashMap<String, String>,
        body: String,
    ) -> Self {
        Self {
            resources,
            params,
            query,
            body,
            response: Mutex::new(None),
        }
    }

    /// Takes the response recorded by the last `respond` call.
    pub fn take_response(&self) -> Option<(StatusCode, Value)> {
        self.response.lock().take()
    }
}

#[async_trait]
impl Context for HttpContext {
    fn kind(&self) -> ContextKind {
        ContextKind::Http
    }

    fn resources(&self) -> &Resources {
        &self.resources
    }

    fn param(&self, name: &str) -> String {
        self.params.get(name).cloned().unwrap_or_default()
    }

    fn query_param(&self, name: &str) -> String {
        self.query.get(name).cloned().unwrap_or_default()
    }

    fn read_input(&self) -> String {
        self.body.clone()
    }

    async fn respond(&self, code: StatusCode, data: Value) -> ServiceResult {
        *self.response.lock() = Some((code, data));
        Ok(())
    }
}
