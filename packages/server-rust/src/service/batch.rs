//! Size-or-time batch aggregation.
//!
//! [`BatchEngine::run`] owns the batch for its whole life: it receives
//! payloads, fills the batch, and executes it when `size` payloads were
//! accepted or when `timeout` elapsed with at least one pending payload,
//! whichever comes first. Either trigger resets both. Everything happens on
//! the one task that calls `run`, so the count, the reset, and the flush
//! cannot interleave with a concurrent fill.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::debug;

use crate::telemetry::{BATCH_ERRORS, BATCH_FLUSHES};

/// Ordered buffer of payloads. Cleared, not reallocated, after each flush.
#[derive(Debug)]
pub struct Batch<T> {
    items: Vec<T>,
}

impl<T> Batch<T> {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// What a batch is filled with and what a flush does.
#[async_trait]
pub trait BatchHandler: Send + 'static {
    type Item: Send + 'static;

    /// Adds one payload to the batch. Appends by default.
    ///
    /// # Errors
    ///
    /// A rejected payload is reported and not counted.
    fn fill(&mut self, batch: &mut Batch<Self::Item>, item: Self::Item) -> anyhow::Result<()> {
        batch.push(item);
        Ok(())
    }

    /// Processes a full (or timed-out, or final) batch.
    ///
    /// # Errors
    ///
    /// Reported on the error channel; the engine keeps running.
    async fn execute(&mut self, batch: &Batch<Self::Item>) -> anyhow::Result<()>;
}

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Timeout,
    /// The payload stream closed with items pending.
    Drain,
}

impl FlushTrigger {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Timeout => "timeout",
            Self::Drain => "drain",
        }
    }
}

/// Failures reported on the engine's error channel.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("batch fill failed: {0:#}")]
    Fill(anyhow::Error),
    #[error("batch execute failed ({trigger:?} flush of {items} items): {source:#}")]
    Execute {
        trigger: FlushTrigger,
        items: usize,
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Accepted payloads that force a flush. Always at least 1.
    pub size: usize,
    /// Idle time that flushes a partial batch. `None` disables the timer.
    pub timeout: Option<Duration>,
}

impl BatchConfig {
    /// `size` of 0 is raised to 1; a zero `timeout` disables time-based flushing.
    #[must_use]
    pub fn new(size: usize, timeout: Duration) -> Self {
        Self {
            size: size.max(1),
            timeout: (!timeout.is_zero()).then_some(timeout),
        }
    }
}

pub struct BatchEngine;

impl BatchEngine {
    /// Runs until `payloads` closes, then flushes what is pending and
    /// returns the handler.
    ///
    /// A flush never runs with zero accepted payloads. `fill` and `execute`
    /// failures go to `errors` and do not stop the loop.
    pub async fn run<H: BatchHandler>(
        config: BatchConfig,
        mut handler: H,
        mut payloads: mpsc::Receiver<H::Item>,
        errors: mpsc::UnboundedSender<BatchError>,
    ) -> H {
        let mut batch = Batch::with_capacity(config.size);
        let mut pending = 0usize;
        let mut ticker = config.timeout.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                payload = payloads.recv() => {
                    let Some(payload) = payload else { break };
                    match handler.fill(&mut batch, payload) {
                        Ok(()) => pending += 1,
                        Err(e) => {
                            metrics::counter!(BATCH_ERRORS).increment(1);
                            let _ = errors.send(BatchError::Fill(e));
                        }
                    }
                    if pending >= config.size {
                        flush(&mut handler, &mut batch, FlushTrigger::Size, &errors).await;
                        pending = 0;
                        if let Some(ticker) = ticker.as_mut() {
                            ticker.reset();
                        }
                    }
                }
                () = next_tick(&mut ticker) => {
                    if pending > 0 {
                        flush(&mut handler, &mut batch, FlushTrigger::Timeout, &errors).await;
                        pending = 0;
                    }
                }
            }
        }

        if pending > 0 {
            flush(&mut handler, &mut batch, FlushTrigger::Drain, &errors).await;
        }
        debug!("batch engine stopped");
        handler
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn flush<H: BatchHandler>(
    handler: &mut H,
    batch: &mut Batch<H::Item>,
    trigger: FlushTrigger,
    errors: &mpsc::UnboundedSender<BatchError>,
) {
    let items = batch.len();
    metrics::counter!(BATCH_FLUSHES, "trigger" => trigger.as_str()).increment(1);
    debug!(trigger = trigger.as_str(), items, "flushing batch");
    if let Err(source) = handler.execute(batch).await {
        metrics::counter!(BATCH_ERRORS).increment(1);
        let _ = errors.send(BatchError::Execute {
            trigger,
            items,
            source,
        });
    }
    batch.clear();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default, Clone)]
    struct Recorder {
        flushes: Arc<Mutex<Vec<Vec<u32>>>>,
        fail_on: Option<u32>,
    }

    #[async_trait]
    impl BatchHandler for Recorder {
        type Item = u32;

        fn fill(&mut self, batch: &mut Batch<u32>, item: u32) -> anyhow::Result<()> {
            if Some(item) == self.fail_on {
                anyhow::bail!("rejected {item}");
            }
            batch.push(item);
            Ok(())
        }

        async fn execute(&mut self, batch: &Batch<u32>) -> anyhow::Result<()> {
            self.flushes.lock().push(batch.items().to_vec());
            if batch.items().contains(&99) {
                anyhow::bail!("poison item");
            }
            Ok(())
        }
    }

    struct Harness {
        tx: mpsc::Sender<u32>,
        errors: mpsc::UnboundedReceiver<BatchError>,
        flushes: Arc<Mutex<Vec<Vec<u32>>>>,
        engine: tokio::task::JoinHandle<Recorder>,
    }

    fn start(size: usize, timeout: Duration, recorder: Recorder) -> Harness {
        let (tx, rx) = mpsc::channel(64);
        let (err_tx, errors) = mpsc::unbounded_channel();
        let flushes = Arc::clone(&recorder.flushes);
        let engine = tokio::spawn(BatchEngine::run(
            BatchConfig::new(size, timeout),
            recorder,
            rx,
            err_tx,
        ));
        Harness {
            tx,
            errors,
            flushes,
            engine,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn size_trigger_flushes_exact_batch() {
        let h = start(3, Duration::from_secs(5), Recorder::default());
        for i in 1..=3 {
            h.tx.send(i).await.unwrap();
        }
        settle().await;
        assert_eq!(*h.flushes.lock(), vec![vec![1, 2, 3]]);

        // The timer was reset by the size flush and nothing is pending.
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(h.flushes.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_trigger_flushes_partial_batch_once() {
        let h = start(3, Duration::from_secs(5), Recorder::default());
        h.tx.send(1).await.unwrap();
        h.tx.send(2).await.unwrap();
        settle().await;
        assert!(h.flushes.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(*h.flushes.lock(), vec![vec![1, 2]]);

        // An idle period produces no empty flush.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.flushes.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_drains_pending_items_once() {
        let h = start(10, Duration::from_secs(60), Recorder::default());
        for i in 0..4 {
            h.tx.send(i).await.unwrap();
        }
        drop(h.tx);
        let recorder = h.engine.await.unwrap();
        assert_eq!(*recorder.flushes.lock(), vec![vec![0, 1, 2, 3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_with_nothing_buffered_does_not_flush() {
        let h = start(10, Duration::from_secs(1), Recorder::default());
        tokio::time::sleep(Duration::from_secs(3)).await;
        drop(h.tx);
        let recorder = h.engine.await.unwrap();
        assert!(recorder.flushes.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn size_one_flushes_every_item() {
        let h = start(1, Duration::from_secs(1), Recorder::default());
        for i in 0..3 {
            h.tx.send(i).await.unwrap();
        }
        drop(h.tx);
        let recorder = h.engine.await.unwrap();
        assert_eq!(*recorder.flushes.lock(), vec![vec![0], vec![1], vec![2]]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_flushes_by_size_only() {
        let h = start(3, Duration::ZERO, Recorder::default());
        h.tx.send(1).await.unwrap();
        h.tx.send(2).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(h.flushes.lock().is_empty());

        h.tx.send(3).await.unwrap();
        h.tx.send(4).await.unwrap();
        drop(h.tx);
        let recorder = h.engine.await.unwrap();
        assert_eq!(*recorder.flushes.lock(), vec![vec![1, 2, 3], vec![4]]);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_reported_and_loop_continues() {
        let recorder = Recorder {
            fail_on: Some(7),
            ..Recorder::default()
        };
        let mut h = start(2, Duration::ZERO, recorder);
        for i in [7, 99, 1, 2, 3] {
            h.tx.send(i).await.unwrap();
        }
        drop(h.tx);
        let recorder = h.engine.await.unwrap();

        // 7 was rejected by fill and never counted.
        assert_eq!(*recorder.flushes.lock(), vec![vec![99, 1], vec![2, 3]]);

        assert!(matches!(h.errors.recv().await, Some(BatchError::Fill(_))));
        assert!(matches!(
            h.errors.recv().await,
            Some(BatchError::Execute {
                trigger: FlushTrigger::Size,
                items: 2,
                ..
            })
        ));
        assert!(h.errors.recv().await.is_none());
    }

    #[test]
    fn config_normalises_inputs() {
        let config = BatchConfig::new(0, Duration::ZERO);
        assert_eq!(config.size, 1);
        assert_eq!(config.timeout, None);
        assert_eq!(
            BatchConfig::new(5, Duration::from_secs(2)).timeout,
            Some(Duration::from_secs(2))
        );
    }
}
