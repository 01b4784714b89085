//! Lazily-opened external clients owned by one runtime.
//!
//! Clients are created on first request and then shared by every context the
//! runtime builds. [`Resources::close`] releases whatever was opened exactly
//! once; after that every accessor fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{CacheError, QueueError};
use crate::traits::{Backends, Cache, MessageQueue, Producer};

pub struct Resources {
    backends: Arc<dyn Backends>,
    cache: Mutex<Option<Arc<dyn Cache>>>,
    producer: Mutex<Option<Arc<dyn Producer>>>,
    queue: Mutex<Option<Arc<dyn MessageQueue>>>,
    closed: AtomicBool,
}

impl Resources {
    #[must_use]
    pub fn new(backends: Arc<dyn Backends>) -> Self {
        Self {
            backends,
            cache: Mutex::new(None),
            producer: Mutex::new(None),
            queue: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the cache client, opening it on first use.
    ///
    /// # Errors
    ///
    /// Fails after [`close`](Self::close) or when the backend cannot open one.
    pub fn cache(&self) -> Result<Arc<dyn Cache>, CacheError> {
        if self.is_closed() {
            return Err(CacheError::Unavailable("runtime resources are closed".into()));
        }
        let mut slot = self.cache.lock();
        if let Some(cache) = slot.as_ref() {
            return Ok(Arc::clone(cache));
        }
        let cache = self.backends.connect_cache()?;
        debug!("cache client opened");
        *slot = Some(Arc::clone(&cache));
        Ok(cache)
    }

    /// Returns the producer client, opening it on first use.
    ///
    /// # Errors
    ///
    /// Fails after [`close`](Self::close) or when the backend cannot open one.
    pub fn producer(&self) -> Result<Arc<dyn Producer>, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let mut slot = self.producer.lock();
        if let Some(producer) = slot.as_ref() {
            return Ok(Arc::clone(producer));
        }
        let producer = self.backends.connect_producer()?;
        debug!("producer client opened");
        *slot = Some(Arc::clone(&producer));
        Ok(producer)
    }

    /// Returns the consumer-side broker client, opening it on first use.
    ///
    /// # Errors
    ///
    /// Fails after [`close`](Self::close) or when the backend cannot open one.
    pub fn queue(&self) -> Result<Arc<dyn MessageQueue>, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let mut slot = self.queue.lock();
        if let Some(queue) = slot.as_ref() {
            return Ok(Arc::clone(queue));
        }
        let queue = self.backends.connect_queue()?;
        debug!("queue client opened");
        *slot = Some(Arc::clone(&queue));
        Ok(queue)
    }

    /// The cache client if one was ever opened.
    #[must_use]
    pub fn opened_cache(&self) -> Option<Arc<dyn Cache>> {
        self.cache.lock().clone()
    }

    /// The queue client if one was ever opened.
    #[must_use]
    pub fn opened_queue(&self) -> Option<Arc<dyn MessageQueue>> {
        self.queue.lock().clone()
    }

    /// Checks every opened dependency.
    ///
    /// Returns the reason of the first failure. Dependencies that were never
    /// opened count as healthy.
    pub async fn check_alive(&self) -> Result<(), String> {
        if let Some(cache) = self.opened_cache() {
            cache
                .healthcheck()
                .await
                .map_err(|e| format!("Cacher healthcheck failed: {e}"))?;
        }
        if let Some(queue) = self.opened_queue() {
            queue
                .healthcheck()
                .await
                .map_err(|e| format!("Queue healthcheck failed: {e}"))?;
        }
        Ok(())
    }

    /// Closes every opened client. Only the first call does anything.
    ///
    /// Returns `true` for that first call.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let cache = self.cache.lock().take();
        let producer = self.producer.lock().take();
        let queue = self.queue.lock().take();

        if let Some(cache) = cache {
            if let Err(e) = cache.close().await {
                warn!(error = %e, "closing cache failed");
            }
        }
        if let Some(producer) = producer {
            if let Err(e) = producer.close().await {
                warn!(error = %e, "closing producer failed");
            }
        }
        if let Some(queue) = queue {
            if let Err(e) = queue.close().await {
                warn!(error = %e, "closing queue failed");
            }
        }
        true
    }
}
