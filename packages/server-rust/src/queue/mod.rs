//! Broker-facing types shared by every [`MessageQueue`](crate::traits::MessageQueue)
//! backend.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::time::Duration;

pub use memory::MemoryBroker;
#[cfg(feature = "redis")]
pub use self::redis::RedisStreamBroker;

/// Retention applied when a topic is created with a zero retention.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// One message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub topic: String,
    pub key: String,
    pub payload: String,
}

/// How long a subscriber read may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTimeout {
    /// Block until a message arrives or the broker closes.
    Infinite,
    /// Give up with [`QueueError::TimedOut`](crate::error::QueueError::TimedOut).
    After(Duration),
}

impl ReadTimeout {
    /// `None` or a zero duration means wait forever.
    #[must_use]
    pub fn from_option(timeout: Option<Duration>) -> Self {
        match timeout {
            Some(d) if !d.is_zero() => Self::After(d),
            _ => Self::Infinite,
        }
    }
}

/// Topic creation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u16,
    pub retention: Duration,
}

impl TopicSpec {
    /// Settings the runtime uses for the topics it creates itself.
    #[must_use]
    pub fn service_default(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 5,
            replication_factor: 1,
            retention: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }

    /// Retention with the zero value replaced by [`DEFAULT_RETENTION`].
    #[must_use]
    pub fn effective_retention(&self) -> Duration {
        if self.retention.is_zero() {
            DEFAULT_RETENTION
        } else {
            self.retention
        }
    }
}
