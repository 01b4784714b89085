use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What a registered loop does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Consumer,
    BatchConsumer,
    Scheduler,
    AsyncTask,
    ParallelTaskWorker,
}

impl ServiceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Consumer => "consumer",
            Self::BatchConsumer => "batch-consumer",
            Self::Scheduler => "scheduler",
            Self::AsyncTask => "async-task",
            Self::ParallelTaskWorker => "ptask-worker",
        }
    }
}

struct Entry {
    name: String,
    kind: ServiceKind,
    handle: JoinHandle<()>,
}

/// Background loops spawned by one runtime.
///
/// Loops are spawned at registration and tracked here so shutdown can wait
/// for them. Nothing is ever aborted: a loop still running after the grace
/// period is reported and left to finish on its own.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `future` on the current runtime and records it.
    pub fn spawn<F>(&self, name: impl Into<String>, kind: ServiceKind, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(service = %name, kind = kind.as_str(), "spawning service loop");
        let handle = tokio::spawn(future);
        self.entries.lock().push(Entry { name, kind, handle });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// `(name, kind)` of every registered loop, in registration order.
    #[must_use]
    pub fn services(&self) -> Vec<(String, ServiceKind)> {
        self.entries
            .lock()
            .iter()
            .map(|e| (e.name.clone(), e.kind))
            .collect()
    }

    /// True when at least one loop is registered and all of them returned.
    #[must_use]
    pub fn all_finished(&self) -> bool {
        let entries = self.entries.lock();
        !entries.is_empty() && entries.iter().all(|e| e.handle.is_finished())
    }

    /// Waits for every loop registered so far, giving up after `grace`.
    ///
    /// Returns the names of loops still running at the deadline.
    pub async fn join_all(&self, grace: Duration) -> Vec<String> {
        let entries = std::mem::take(&mut *self.entries.lock());
        let deadline = tokio::time::Instant::now() + grace;
        let mut unfinished = Vec::new();

        for mut entry in entries {
            match tokio::time::timeout_at(deadline, &mut entry.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(service = %entry.name, kind = entry.kind.as_str(), error = %e, "service loop panicked");
                }
                Err(_) => {
                    warn!(service = %entry.name, kind = entry.kind.as_str(), "service loop still running after grace period");
                    unfinished.push(entry.name);
                }
            }
        }
        unfinished
    }
}
