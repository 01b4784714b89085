//! Relay server: a runtime for message-driven worker services.
//!
//! One handler body can serve an HTTP route, a queue consumer, a batch
//! consumer, a timer, an async task, or a fanned-out parallel-task worker.
//! See [`service::ServiceRuntime`] for registration and lifecycle.

pub mod backends;
pub mod cache;
pub mod context;
pub mod error;
pub mod network;
pub mod queue;
pub mod requester;
pub mod service;
pub mod telemetry;
pub mod traits;

pub use backends::{from_addresses, MemoryBackends};
pub use context::{Context, ContextKind, ServiceHandler, SharedHandler};
pub use error::{ServiceError, ServiceResult};
pub use queue::ReadTimeout;
pub use service::{ServiceConfig, ServiceRuntime};
