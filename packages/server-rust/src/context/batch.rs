use std::sync::Arc;

use async_trait::async_trait;

use super::{Context, ContextKind};
use crate::service::resources::Resources;

/// Context for one flushed batch of queued messages.
pub struct BatchConsumerContext {
    resources: Arc<Resources>,
    messages: Vec<String>,
}

impl BatchConsumerContext {
    #[must_use]
    pub fn new(resources: Arc<Resources>, messages: Vec<String>) -> Self {
        Self {
            resources,
            messages,
        }
    }
}

#[async_trait]
impl Context for BatchConsumerContext {
    fn kind(&self) -> ContextKind {
        ContextKind::BatchConsumer
    }

    fn resources(&self) -> &Resources {
        &self.resources
    }

    fn read_inputs(&self) -> Vec<String> {
        self.messages.clone()
    }
}
