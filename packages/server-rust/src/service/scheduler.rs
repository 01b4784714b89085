//! Periodic timers.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::consumer::record_failure;
use super::resources::Resources;
use crate::context::{ContextKind, SchedulerContext, SharedHandler};
use crate::error::{ServiceError, ServiceResult};

/// Ticks delivered later than this after their deadline are dropped.
pub const STALE_TICK: Duration = Duration::from_secs(10);

/// Stops one scheduler without touching the rest of the runtime.
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
    name: String,
    token: CancellationToken,
}

impl ScheduleHandle {
    pub(crate) fn new(name: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            name: name.into(),
            token,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer. The tick currently being handled, if any, completes.
    pub fn stop(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// # Errors
///
/// [`ServiceError::InvalidArgument`] for a zero interval.
pub(crate) fn validate_interval(interval: Duration) -> ServiceResult {
    if interval.is_zero() {
        return Err(ServiceError::InvalidArgument(
            "schedule interval must be greater than zero".into(),
        ));
    }
    Ok(())
}

fn is_stale(deadline: Instant, now: Instant) -> bool {
    now.saturating_duration_since(deadline) > STALE_TICK
}

/// Invokes `handler` once per `interval` until `token` fires.
///
/// The first call happens one full interval after start. Ticks missed while
/// a call was running are skipped, not replayed.
pub(crate) async fn run_scheduler(
    name: String,
    resources: Arc<Resources>,
    interval: Duration,
    handler: SharedHandler,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(schedule = %name, ?interval, "scheduler started");

    loop {
        let deadline = tokio::select! {
            biased;
            () = token.cancelled() => break,
            deadline = ticker.tick() => deadline,
        };
        if is_stale(deadline, Instant::now()) {
            debug!(schedule = %name, "skipping stale tick");
            continue;
        }
        let ctx = Arc::new(SchedulerContext::new(Arc::clone(&resources)));
        if let Err(e) = handler.call(ctx).await {
            record_failure(ContextKind::Scheduler, &name, &e);
        }
    }
    debug!(schedule = %name, "scheduler stopped");
}
