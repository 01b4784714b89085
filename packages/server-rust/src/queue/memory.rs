//! In-process broker with topic logs and consumer groups.
//!
//! Each topic is an append-only log addressed by offset. A consumer group
//! owns one read offset per topic, so members of the same group compete for
//! messages while separate groups each see every message. New groups start
//! at the earliest retained message. Readers block on a `Notify` instead of
//! polling.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::{QueueMessage, ReadTimeout, TopicSpec, DEFAULT_RETENTION};
use crate::error::QueueError;
use crate::traits::{MessageQueue, Producer, Subscription};

#[derive(Debug)]
struct Entry {
    key: String,
    payload: String,
    appended_at: Instant,
}

#[derive(Debug)]
struct LogState {
    retention: Duration,
    /// Offset of `entries[0]`.
    base_offset: u64,
    entries: VecDeque<Entry>,
    /// Next offset to deliver, per consumer group.
    groups: HashMap<String, u64>,
}

impl LogState {
    fn new(retention: Duration) -> Self {
        Self {
            retention,
            base_offset: 0,
            entries: VecDeque::new(),
            groups: HashMap::new(),
        }
    }

    fn trim(&mut self, now: Instant) {
        while let Some(front) = self.entries.front() {
            if now.duration_since(front.appended_at) < self.retention {
                break;
            }
            self.entries.pop_front();
            self.base_offset += 1;
        }
    }

    fn next_for(&mut self, group: &str) -> Option<&Entry> {
        let base = self.base_offset;
        let offset = self.groups.entry(group.to_owned()).or_insert(base);
        if *offset < base {
            *offset = base;
        }
        let index = usize::try_from(*offset - base).ok()?;
        let entry = self.entries.get(index)?;
        *offset += 1;
        Some(entry)
    }
}

#[derive(Debug)]
struct TopicLog {
    name: String,
    state: Mutex<LogState>,
    notify: Notify,
}

impl TopicLog {
    fn new(name: &str, retention: Duration) -> Self {
        Self {
            name: name.to_owned(),
            state: Mutex::new(LogState::new(retention)),
            notify: Notify::new(),
        }
    }

    fn append(&self, key: &str, payload: &str) {
        let now = Instant::now();
        {
            let mut state = self.state.lock();
            state.trim(now);
            state.entries.push_back(Entry {
                key: key.to_owned(),
                payload: payload.to_owned(),
                appended_at: now,
            });
        }
        self.notify.notify_waiters();
    }

    fn poll(&self, group: &str) -> Option<QueueMessage> {
        let mut state = self.state.lock();
        state.trim(Instant::now());
        state.next_for(group).map(|entry| QueueMessage {
            topic: self.name.clone(),
            key: entry.key.clone(),
            payload: entry.payload.clone(),
        })
    }

    /// Applies a new retention to a log that already exists.
    fn set_retention(&self, retention: Duration) {
        let mut state = self.state.lock();
        state.retention = retention;
        state.trim(Instant::now());
    }

    fn register_group(&self, group: &str) {
        let mut state = self.state.lock();
        let base = state.base_offset;
        state.groups.entry(group.to_owned()).or_insert(base);
    }
}

/// Shared in-process broker. Cloning is not needed; share it through `Arc`.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    topics: DashMap<String, Arc<TopicLog>>,
    closed: Arc<AtomicBool>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, name: &str) -> Arc<TopicLog> {
        Arc::clone(
            self.topics
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(TopicLog::new(name, DEFAULT_RETENTION)))
                .value(),
        )
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    /// Number of messages currently retained on `topic`.
    #[must_use]
    pub fn len(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map_or(0, |log| log.state.lock().entries.len())
    }

    #[must_use]
    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// Returns every retained payload on `topic`, oldest first.
    #[must_use]
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.topics.get(topic).map_or_else(Vec::new, |log| {
            log.state
                .lock()
                .entries
                .iter()
                .map(|e| e.payload.clone())
                .collect()
        })
    }

    /// Closes the broker for every holder: pending and future reads fail
    /// with [`QueueError::Closed`].
    ///
    /// The trait-level `close` only detaches one client, because several
    /// runtimes in one process may share this broker.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        for log in &self.topics {
            log.notify.notify_waiters();
        }
    }
}

#[async_trait]
impl Producer for MemoryBroker {
    async fn send_message(&self, topic: &str, key: &str, payload: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.topic(topic).append(key, payload);
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for MemoryBroker {
    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
    ) -> Result<Box<dyn Subscription>, QueueError> {
        self.ensure_open()?;
        let log = self.topic(topic);
        log.register_group(group_id);
        debug!(topic, group = group_id, "memory subscription opened");
        Ok(Box::new(MemorySubscription {
            log,
            group: group_id.to_owned(),
            closed: Arc::clone(&self.closed),
        }))
    }

    async fn create_topic(&self, spec: &TopicSpec) -> Result<(), QueueError> {
        self.ensure_open()?;
        let retention = spec.effective_retention();
        self.topics
            .entry(spec.name.clone())
            .and_modify(|log| log.set_retention(retention))
            .or_insert_with(|| Arc::new(TopicLog::new(&spec.name, retention)));
        Ok(())
    }

    async fn healthcheck(&self) -> Result<(), QueueError> {
        self.ensure_open()
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

struct MemorySubscription {
    log: Arc<TopicLog>,
    group: String,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn read(&mut self, timeout: ReadTimeout) -> Result<QueueMessage, QueueError> {
        let deadline = match timeout {
            ReadTimeout::Infinite => None,
            ReadTimeout::After(d) => Some(Instant::now() + d),
        };

        loop {
            // Register interest before checking so an append between the
            // check and the await still wakes us.
            let notified = self.log.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return Err(QueueError::Closed);
            }
            if let Some(message) = self.log.poll(&self.group) {
                return Ok(message);
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(QueueError::TimedOut);
                    }
                }
            }
        }
    }
}
