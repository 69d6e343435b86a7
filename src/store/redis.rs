//! Redis-backed [`CacheStore`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, ErrorKind, RedisError};
use std::time::Duration;
use tracing::debug;

use super::{CacheStore, StoreError};

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Shared multiplexed connection; cheap to clone per call.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect and keep a self-reconnecting multiplexed connection.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the first connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid redis url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to redis")?;
        debug!("redis connection established");
        Ok(Self { conn })
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn not_an_integer(err: &RedisError) -> bool {
    err.kind() == ErrorKind::ResponseError && err.to_string().contains("not an integer")
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.pset_ex::<_, _, ()>(key, value, millis(ttl)).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GETDEL").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        // SET NX creates the counter with its expiry; INCR keeps the TTL.
        let result: Result<(u64,), RedisError> = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(0)
            .arg("NX")
            .arg("PX")
            .arg(millis(window))
            .ignore()
            .incr(key, 1)
            .query_async(&mut conn)
            .await;

        match result {
            Ok((count,)) => Ok(count),
            Err(err) if not_an_integer(&err) => Err(StoreError::Corrupt {
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        let ms: i64 = conn.pttl(key).await?;
        Ok(u64::try_from(ms).ok().map(Duration::from_millis))
    }
}
