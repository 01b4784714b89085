//! Redis-backed cache.
//!
//! The multiplexed connection is opened on first use and shared by every
//! clone of the handle. Compare-and-set runs as a Lua script so the check and
//! the write happen in one server-side step.

use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::traits::Cache;

const HEALTHCHECK_ATTEMPTS: u32 = 5;
const HEALTHCHECK_BACKOFF: Duration = Duration::from_millis(250);

/// KEYS[1] = key; ARGV = [has_expected, expected, value, ttl_ms]
const SET_IF_UNCHANGED_LUA: &str = r"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current ~= ARGV[2] then
        return 0
    end
elseif current then
    return 0
end
if tonumber(ARGV[4]) > 0 then
    redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
else
    redis.call('SET', KEYS[1], ARGV[3])
end
return 1
";

pub struct RedisCache {
    client: ::redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    cas: Script,
}

impl RedisCache {
    /// Creates a cache handle for `url` without connecting.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Redis`] if the URL cannot be parsed.
    pub fn new(url: &str) -> Result<Self, CacheError> {
        Ok(Self {
            client: ::redis::Client::open(url)?,
            conn: Mutex::new(None),
            cas: Script::new(SET_IF_UNCHANGED_LUA),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        let cached = self.conn.lock().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        debug!("redis cache connected");
        Ok(self.conn.lock().get_or_insert(conn).clone())
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        if ttl.is_zero() {
            let () = conn.set(key, value).await?;
        } else {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            let () = conn.pset_ex(key, value, millis).await?;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn set_if_unchanged(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        let written: i64 = self
            .cas
            .key(key)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or_default())
            .arg(value)
            .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn healthcheck(&self) -> Result<(), CacheError> {
        let mut last_err = None;
        for attempt in 1..=HEALTHCHECK_ATTEMPTS {
            let result = match self.connection().await {
                Ok(mut conn) => ::redis::cmd("PING")
                    .query_async::<String>(&mut conn)
                    .await
                    .map_err(CacheError::from),
                Err(e) => Err(e),
            };
            match result {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "redis cache healthcheck failed");
                    // A broken connection is reopened on the next attempt.
                    self.conn.lock().take();
                    last_err = Some(e);
                }
            }
            tokio::time::sleep(HEALTHCHECK_BACKOFF).await;
        }
        Err(last_err.unwrap_or_else(|| CacheError::Unavailable("no healthcheck attempts".into())))
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.conn.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_url_is_rejected() {
        assert!(RedisCache::new("not a url").is_err());
    }

    #[tokio::test]
    async fn close_without_connecting_is_harmless() {
        let cache = RedisCache::new("redis://127.0.0.1:1").unwrap();
        cache.close().await.unwrap();
        cache.close().await.unwrap();
    }
}
