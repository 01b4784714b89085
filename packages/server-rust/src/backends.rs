//! Concrete [`Backends`] factories.

use std::sync::Arc;

use crate::cache::MemoryCache;
use crate::error::{CacheError, QueueError};
use crate::queue::MemoryBroker;
use crate::traits::{Backends, Cache, MessageQueue, Producer};

/// In-process backends.
///
/// Clones share one cache and one broker, so several runtimes in a single
/// process (an API node and its workers, say) see each other's records and
/// messages.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackends {
    cache: Arc<MemoryCache>,
    broker: Arc<MemoryBroker>,
}

impl MemoryBackends {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn cache(&self) -> Arc<MemoryCache> {
        Arc::clone(&self.cache)
    }

    #[must_use]
    pub fn broker(&self) -> Arc<MemoryBroker> {
        Arc::clone(&self.broker)
    }
}

impl Backends for MemoryBackends {
    fn connect_cache(&self) -> Result<Arc<dyn Cache>, CacheError> {
        Ok(self.cache.clone())
    }

    fn connect_producer(&self) -> Result<Arc<dyn Producer>, QueueError> {
        Ok(self.broker.clone())
    }

    fn connect_queue(&self) -> Result<Arc<dyn MessageQueue>, QueueError> {
        Ok(self.broker.clone())
    }
}

/// Redis cache plus Redis Streams broker.
#[cfg(feature = "redis")]
#[derive(Debug, Clone)]
pub struct RedisBackends {
    cache_url: String,
    broker_url: String,
}

#[cfg(feature = "redis")]
impl RedisBackends {
    #[must_use]
    pub fn new(cache_url: impl Into<String>, broker_url: impl Into<String>) -> Self {
        Self {
            cache_url: cache_url.into(),
            broker_url: broker_url.into(),
        }
    }
}

#[cfg(feature = "redis")]
impl Backends for RedisBackends {
    fn connect_cache(&self) -> Result<Arc<dyn Cache>, CacheError> {
        Ok(Arc::new(crate::cache::RedisCache::new(&self.cache_url)?))
    }

    fn connect_producer(&self) -> Result<Arc<dyn Producer>, QueueError> {
        Ok(Arc::new(crate::queue::RedisStreamBroker::new(&self.broker_url)?))
    }

    fn connect_queue(&self) -> Result<Arc<dyn MessageQueue>, QueueError> {
        Ok(Arc::new(crate::queue::RedisStreamBroker::new(&self.broker_url)?))
    }
}

/// Picks backends from the configured addresses.
///
/// Empty addresses select the in-process backends.
///
/// # Errors
///
/// Returns an error when a networked address is configured but this build
/// lacks the `redis` feature.
pub fn from_addresses(cache_server: &str, mq_servers: &str) -> anyhow::Result<Arc<dyn Backends>> {
    if cache_server.is_empty() && mq_servers.is_empty() {
        return Ok(Arc::new(MemoryBackends::new()));
    }
    #[cfg(feature = "redis")]
    {
        let cache = if cache_server.is_empty() { mq_servers } else { cache_server };
        let broker = if mq_servers.is_empty() { cache_server } else { mq_servers };
        Ok(Arc::new(RedisBackends::new(redis_url(cache), redis_url(broker))))
    }
    #[cfg(not(feature = "redis"))]
    {
        anyhow::bail!(
            "CACHE_SERVER/MQ_SERVERS are set but relay-server was built without the `redis` feature"
        )
    }
}

/// Accepts bare `host:port` as well as full URLs.
#[cfg(feature = "redis")]
fn redis_url(addr: &str) -> String {
    let first = addr.split(',').next().unwrap_or(addr).trim();
    if first.contains("://") {
        first.to_owned()
    } else {
        format!("redis://{first}")
    }
}
