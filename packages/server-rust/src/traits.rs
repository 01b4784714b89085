//! Seams to the external collaborators: key-value cache, message producer,
//! message broker, and the factory that opens them.
//!
//! Every trait is object-safe and used as `Arc<dyn _>` so a runtime can swap
//! the in-process backends for networked ones without touching handlers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, QueueError};
use crate::queue::{QueueMessage, ReadTimeout, TopicSpec};

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Shared key-value cache holding raw (JSON) string values.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Stores `value` under `key`, expiring after `ttl` (zero means never).
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Returns the raw value, or `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Reports whether the current raw value differs from `previous`.
    async fn has_changed(&self, key: &str, previous: Option<&str>) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.as_deref() != previous)
    }

    /// Writes `value` only if the current raw value still equals `expected`.
    ///
    /// Returns `false` without writing when another writer got there first.
    /// The default is a check followed by a separate write, so a conflicting
    /// write can still slip in between; backends that can compare and write
    /// atomically override it.
    async fn set_if_unchanged(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        if self.has_changed(key, expected).await? {
            return Ok(false);
        }
        self.set(key, value, ttl).await?;
        Ok(true)
    }

    /// Verifies the cache is reachable.
    async fn healthcheck(&self) -> Result<(), CacheError>;

    /// Releases the connection. Calling it twice is harmless.
    async fn close(&self) -> Result<(), CacheError>;
}

/// JSON helpers available on every [`Cache`].
#[async_trait]
pub trait CacheExt: Cache {
    /// Serialises `value` and stores it.
    async fn set_json<T: Serialize + Sync + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw, ttl).await
    }

    /// Reads and deserialises the value under `key`.
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key).await? {
            Some(raw) if !raw.is_empty() => Ok(Some(serde_json::from_str(&raw)?)),
            _ => Ok(None),
        }
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Publishing side of the broker.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Appends `payload` to `topic`, partitioned by `key`.
    async fn send_message(&self, topic: &str, key: &str, payload: &str) -> Result<(), QueueError>;

    /// Flushes and releases the producer.
    async fn close(&self) -> Result<(), QueueError>;
}

/// JSON helper available on every [`Producer`].
#[async_trait]
pub trait ProducerExt: Producer {
    async fn send_json<T: Serialize + Sync + ?Sized>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(), QueueError> {
        let raw = serde_json::to_string(value)?;
        self.send_message(topic, key, &raw).await
    }
}

impl<P: Producer + ?Sized> ProducerExt for P {}

/// Consuming side of the broker.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Joins consumer group `group_id` on `topic`.
    ///
    /// Every group sees each message once; members of one group compete.
    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
    ) -> Result<Box<dyn Subscription>, QueueError>;

    /// Creates `spec.name` if it does not exist yet.
    async fn create_topic(&self, spec: &TopicSpec) -> Result<(), QueueError>;

    async fn healthcheck(&self) -> Result<(), QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

/// A consumer-group membership returned by [`MessageQueue::subscribe`].
#[async_trait]
pub trait Subscription: Send {
    /// Blocks until the next message arrives.
    ///
    /// # Errors
    ///
    /// [`QueueError::TimedOut`] when a finite timeout elapses first;
    /// [`QueueError::Closed`] once the broker shuts down.
    async fn read(&mut self, timeout: ReadTimeout) -> Result<QueueMessage, QueueError>;
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Opens the external clients a runtime needs.
///
/// Connecting is cheap: clients establish their network connection on first
/// use, so a runtime may call these lazily from any handler.
pub trait Backends: Send + Sync {
    /// Opens a cache client.
    ///
    /// # Errors
    ///
    /// Returns an error when the cache address is invalid.
    fn connect_cache(&self) -> Result<Arc<dyn Cache>, CacheError>;

    /// Opens a producer client.
    ///
    /// # Errors
    ///
    /// Returns an error when the broker address is invalid.
    fn connect_producer(&self) -> Result<Arc<dyn Producer>, QueueError>;

    /// Opens a consumer-side broker client.
    ///
    /// # Errors
    ///
    /// Returns an error when the broker address is invalid.
    fn connect_queue(&self) -> Result<Arc<dyn MessageQueue>, QueueError>;
}
