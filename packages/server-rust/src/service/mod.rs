//! The service runtime and the engines it drives.
//!
//! - [`runtime`]: registration and lifecycle ([`ServiceRuntime`])
//! - [`consumer`] / [`scheduler`]: the background loops
//! - [`batch`]: size-or-time batch aggregation
//! - [`ptask`]: parallel-task fan-out and optimistic fan-in
//! - [`async_task`]: request/response correlation through the cache
//! - [`resources`]: lazily opened clients shared by every context

pub mod async_task;
pub mod batch;
pub mod config;
pub mod consumer;
pub mod ptask;
pub mod registry;
pub mod resources;
pub mod runtime;
pub mod scheduler;

pub use async_task::AsyncTaskCorrelator;
pub use batch::{Batch, BatchConfig, BatchEngine, BatchError, BatchHandler, FlushTrigger};
pub use config::ServiceConfig;
pub use consumer::MessageKind;
pub use ptask::{CompletionMerger, MergeOutcome, PTaskError, ParallelTaskCoordinator, SubmitOutcome};
pub use registry::{ServiceKind, ServiceRegistry};
pub use resources::Resources;
pub use runtime::ServiceRuntime;
pub use scheduler::ScheduleHandle;
