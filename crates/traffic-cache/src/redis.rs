//! Redis cache backend
//!
//! Thin mapping of the [`Cache`] trait onto a Redis connection. Key
//! enumeration uses cursor-based `SCAN` so the sweep paths never run a
//! stop-the-world `KEYS` against the shared store.
//!
//! Redis globs are looser than the trait's contract (`*` crosses `:`
//! boundaries); callers that need exact segment arity filter the result.

use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client};

use crate::{Cache, CacheError};

/// [`Cache`] backed by a shared Redis instance
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to the store at `url` (e.g. `redis://127.0.0.1:6379/0`).
    /// The connection manager reconnects on its own after transient
    /// failures.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<i64>,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        match ttl_seconds {
            Some(ttl) if ttl <= 0 => Ok(()),
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl as u64).await?;
                Ok(())
            }
            None => {
                let _: () = conn.set(key, value).await?;
                Ok(())
            }
        }
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<(), CacheError> {
        if ttl_seconds <= 0 {
            return self.del(key).await;
        }
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, ttl_seconds).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut iter: ::redis::AsyncIter<String> = conn.scan_match(pattern).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(key, field).await?;
        Ok(())
    }
}
