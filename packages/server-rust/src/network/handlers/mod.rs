//! Axum handlers and the state they share.

pub mod health;
pub mod service;

pub use health::{liveness_handler, readiness_handler};
pub use service::dispatch;

use std::sync::Arc;

use super::ShutdownController;
use crate::service::resources::Resources;

/// Shared state passed to every axum handler via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    /// Clients handed to every [`HttpContext`](crate::context::HttpContext).
    pub resources: Arc<Resources>,
    /// Health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
}
