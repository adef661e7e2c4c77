//! Shared expiring key-value index
//!
//! Every other component of the controller speaks to the KV store only
//! through the [`Cache`] trait defined here. Two implementations exist:
//! [`MemoryCache`] for single-process deployments and tests, and
//! [`RedisCache`] for the shared store a real deployment points at.

pub mod key;
pub mod memory;
pub mod redis;

pub use key::CacheKey;
pub use memory::MemoryCache;
pub use self::redis::RedisCache;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors surfaced by a cache backend
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("cache transport error: {0}")]
    Transport(String),
}

/// Operations every cache backend provides
///
/// Semantics shared by all implementations:
/// - `set` with a `ttl_seconds` of zero or less suppresses the write
///   (the value is already expired).
/// - `del` is idempotent.
/// - `expire` is a no-op on an absent key; a non-positive TTL deletes
///   the key instead.
/// - `keys` treats `*` in the pattern as a single `:`-segment wildcard.
///   Backends with looser glob rules may over-match; callers that care
///   filter by segment count.
///
/// The hash-field operations are unused by the current engine and kept
/// for forward compatibility.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<i64>)
        -> Result<(), CacheError>;

    async fn del(&self, key: &str) -> Result<(), CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<(), CacheError>;

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError>;

    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError>;
}

/// Parse a JSON document, yielding `None` instead of an error on any
/// malformed input. Stored index values may be garbage after partial
/// writes; callers decide whether absence means "reap" or "skip".
pub fn try_parse_json<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_str(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_parse_json_accepts_valid_documents() {
        let parsed: Option<Vec<u16>> = try_parse_json("[1, 2, 3]");
        assert_eq!(parsed, Some(vec![1, 2, 3]));
    }

    #[test]
    fn try_parse_json_rejects_garbage() {
        let parsed: Option<Vec<u16>> = try_parse_json("not json at all");
        assert_eq!(parsed, None);
    }
}
