//! Redis Streams broker.
//!
//! Topics are streams and consumer groups are stream consumer groups, which
//! gives the same "each group once, members compete" delivery as the memory
//! broker. Retention is enforced with `MINID` trimming on every append.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ::redis::aio::MultiplexedConnection;
use ::redis::streams::{StreamReadOptions, StreamReadReply};
use ::redis::AsyncCommands;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{QueueMessage, ReadTimeout, TopicSpec, DEFAULT_RETENTION};
use crate::error::QueueError;
use crate::traits::{MessageQueue, Producer, Subscription};

/// Longest single `XREADGROUP BLOCK` window; longer waits loop.
const BLOCK_WINDOW: Duration = Duration::from_millis(200);

const FIELD_KEY: &str = "key";
const FIELD_PAYLOAD: &str = "payload";

pub struct RedisStreamBroker {
    client: ::redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    retention: DashMap<String, Duration>,
}

impl RedisStreamBroker {
    /// Creates a broker handle for `url` without connecting.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Redis`] if the URL cannot be parsed.
    pub fn new(url: &str) -> Result<Self, QueueError> {
        Ok(Self {
            client: ::redis::Client::open(url)?,
            conn: Mutex::new(None),
            retention: DashMap::new(),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        let cached = self.conn.lock().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(self.conn.lock().get_or_insert(conn).clone())
    }

    fn min_id(&self, topic: &str) -> String {
        let retention = self
            .retention
            .get(topic)
            .map_or(DEFAULT_RETENTION, |r| *r.value());
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        now_ms.saturating_sub(retention.as_millis()).to_string()
    }
}

#[async_trait]
impl Producer for RedisStreamBroker {
    async fn send_message(&self, topic: &str, key: &str, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _id: String = ::redis::cmd("XADD")
            .arg(topic)
            .arg("MINID")
            .arg("~")
            .arg(self.min_id(topic))
            .arg("*")
            .arg(FIELD_KEY)
            .arg(key)
            .arg(FIELD_PAYLOAD)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.conn.lock().take();
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RedisStreamBroker {
    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
    ) -> Result<Box<dyn Subscription>, QueueError> {
        // Blocking reads get their own connection so they never stall
        // publishers sharing the multiplexed one.
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let created: Result<(), ::redis::RedisError> = ::redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group_id)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => debug!(topic, group = group_id, "consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Box::new(RedisSubscription {
            conn,
            topic: topic.to_owned(),
            group: group_id.to_owned(),
            consumer: relay_core::generate_id(),
        }))
    }

    async fn create_topic(&self, spec: &TopicSpec) -> Result<(), QueueError> {
        self.retention
            .insert(spec.name.clone(), spec.effective_retention());
        Ok(())
    }

    async fn healthcheck(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _pong: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.conn.lock().take();
        Ok(())
    }
}

struct RedisSubscription {
    conn: MultiplexedConnection,
    topic: String,
    group: String,
    consumer: String,
}

impl RedisSubscription {
    async fn read_window(&mut self, window: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let block_ms = usize::try_from(window.as_millis()).unwrap_or(usize::MAX).max(1);
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1)
            .block(block_ms);
        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[&self.topic], &[">"], &options)
            .await?;

        let Some(entry) = reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next())
        else {
            return Ok(None);
        };

        let _acked: i64 = self
            .conn
            .xack(&self.topic, &self.group, &[&entry.id])
            .await?;

        let key = entry.get::<String>(FIELD_KEY).unwrap_or_default();
        match entry.get::<String>(FIELD_PAYLOAD) {
            Some(payload) => Ok(Some(QueueMessage {
                topic: self.topic.clone(),
                key,
                payload,
            })),
            None => {
                warn!(topic = %self.topic, id = %entry.id, "stream entry has no payload; skipped");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn read(&mut self, timeout: ReadTimeout) -> Result<QueueMessage, QueueError> {
        let deadline = match timeout {
            ReadTimeout::Infinite => None,
            ReadTimeout::After(d) => Some(Instant::now() + d),
        };

        loop {
            let window = match deadline {
                None => BLOCK_WINDOW,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(QueueError::TimedOut);
                    }
                    remaining.min(BLOCK_WINDOW)
                }
            };
            if let Some(message) = self.read_window(window).await? {
                return Ok(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_url_is_rejected() {
        assert!(RedisStreamBroker::new("::nope::").is_err());
    }

    #[tokio::test]
    async fn min_id_honours_topic_retention() {
        let broker = RedisStreamBroker::new("redis://127.0.0.1:1").unwrap();
        broker
            .create_topic(&TopicSpec {
                retention: Duration::from_secs(1),
                ..TopicSpec::service_default("t")
            })
            .await
            .unwrap();
        let short: u128 = broker.min_id("t").parse().unwrap();
        let long: u128 = broker.min_id("other").parse().unwrap();
        assert!(short > long);
    }
}
