use std::sync::Arc;

use async_trait::async_trait;

use super::{Context, ContextKind};
use crate::service::resources::Resources;

/// Context for one timer tick. Carries no input.
pub struct SchedulerContext {
    resources: Arc<Resources>,
}

impl SchedulerContext {
    #[must_use]
    pub fn new(resources: Arc<Resources>) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl Context for SchedulerContext {
    fn kind(&self) -> ContextKind {
        ContextKind::Scheduler
    }

    fn resources(&self) -> &Resources {
        &self.resources
    }
}
