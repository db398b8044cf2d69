//! Redis-backed [`KvStore`].
//!
//! One `ConnectionManager` is shared by every caller; it multiplexes
//! commands over a single connection and reconnects on failure. The
//! sliding-window hit runs as a `MULTI/EXEC` pipeline so that purge,
//! insert, count and expire are atomic per key.

use std::time::Duration;

use async_trait::async_trait;
use redis::Client;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tracing::info;

use super::{KvStore, ScanPage, WindowHit};
use crate::Result;

/// Connection settings for [`RedisStore`].
///
/// ```rust
/// # use ojeomneo_edge::store::RedisStoreConfig;
/// # use std::time::Duration;
/// let config = RedisStoreConfig::new("redis://127.0.0.1:6379")
///     .connection_timeout(Duration::from_millis(250))
///     .retries(2);
/// ```
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Connection URL, e.g. `redis://:password@host:6379/0`.
    pub url: String,
    /// Timeout for establishing a connection. Default: 500ms.
    pub connection_timeout: Duration,
    /// Reconnect attempts before an operation fails. Default: 1.
    pub retries: usize,
}

impl RedisStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_timeout: Duration::from_millis(500),
            retries: 1,
        }
    }

    /// Set the connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the number of reconnect attempts.
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    fn manager_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig::new()
            .set_number_of_retries(self.retries)
            .set_connection_timeout(self.connection_timeout)
    }
}

/// Redis store shared across API instances.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        let conn = client
            .get_connection_manager_with_config(config.manager_config())
            .await?;

        let store = Self { conn };
        store.ping().await?;
        info!(retries = config.retries, "redis connection established");
        Ok(store)
    }

    /// Round-trip a `PING`.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn record_hit(&self, key: &str, hit: &WindowHit) -> Result<u64> {
        let mut conn = self.conn.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .zrembyscore(key, 0, hit.window_start_nanos)
            .ignore()
            .zadd(key, &hit.member, hit.now_nanos)
            .ignore()
            .zcard(key)
            .expire(key, hit.expire.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let mut conn = self.conn.clone();
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(ScanPage { cursor, keys })
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EdgeError;

    #[test]
    fn manager_config_builds_from_store_config() {
        let config = RedisStoreConfig::new("redis://127.0.0.1:6379")
            .connection_timeout(Duration::from_millis(250))
            .retries(3);
        let _ = config.manager_config();
    }

    #[tokio::test]
    async fn malformed_url_is_a_store_error() {
        let result = RedisStore::connect(&RedisStoreConfig::new("not a redis url")).await;
        assert!(matches!(result, Err(EdgeError::Store(_))));
    }
}
