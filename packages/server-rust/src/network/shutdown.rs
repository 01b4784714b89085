//! Process-wide shutdown broadcast with health state and in-flight tracking.
//!
//! One root [`CancellationToken`] fans the stop signal out to every service
//! loop; each loop receives a child token. Health transitions are lock-free
//! through `ArcSwap`, and in-flight handler calls are counted with RAII guards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;

/// Runtime health state, transitioned by the shutdown controller.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Services are registered but the runtime has not started.
    Starting,
    /// Every service loop is running.
    Ready,
    /// Shutdown was requested; loops are finishing their current unit of work.
    Draining,
    /// All in-flight work completed.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates shutdown across every service owned by one runtime.
///
/// Triggering is idempotent: the first call moves to `Draining` and cancels
/// the root token, later calls do nothing.
#[derive(Debug)]
pub struct ShutdownController {
    token: CancellationToken,
    in_flight: Arc<AtomicU64>,
    health_state: Arc<ArcSwap<HealthState>>,
}

impl ShutdownController {
    /// Creates a new shutdown controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            in_flight: Arc::new(AtomicU64::new(0)),
            health_state: Arc::new(ArcSwap::from_pointee(HealthState::Starting)),
        }
    }

    /// Transitions to `Ready` unless shutdown already began.
    pub fn set_ready(&self) {
        if !self.token.is_cancelled() {
            self.health_state.store(Arc::new(HealthState::Ready));
        }
    }

    /// Returns a token cancelled when shutdown is triggered.
    ///
    /// Each service loop gets its own child so it can also be stopped alone.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Initiates graceful shutdown.
    ///
    /// Returns `true` for the call that actually triggered it.
    pub fn trigger_shutdown(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.health_state.store(Arc::new(HealthState::Draining));
        self.token.cancel();
        true
    }

    /// Returns the current health state.
    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Creates an RAII guard that tracks one in-flight handler call.
    ///
    /// The counter is decremented when the guard drops, including during
    /// unwinding.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Returns the current number of in-flight handler calls.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for all in-flight calls to complete, up to `timeout`.
    ///
    /// Returns `true` (and moves to `Stopped`) on a clean drain, `false` if
    /// the deadline passed first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.health_state.store(Arc::new(HealthState::Stopped));
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
