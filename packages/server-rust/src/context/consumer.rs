use std::sync::Arc;

use async_trait::async_trait;

use super::{Context, ContextKind};
use crate::service::resources::Resources;

/// Context for one queued message.
pub struct ConsumerContext {
    resources: Arc<Resources>,
    message: String,
}

impl ConsumerContext {
    #[must_use]
    pub fn new(resources: Arc<Resources>, message: String) -> Self {
        Self { resources, message }
    }
}

#[async_trait]
impl Context for ConsumerContext {
    fn kind(&self) -> ContextKind {
        ContextKind::Consumer
    }

    fn resources(&self) -> &Resources {
        &self.resources
    }

    fn read_input(&self) -> String {
        self.message.clone()
    }
}
