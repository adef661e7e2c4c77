//! In-memory cache backend
//!
//! Keeps everything in a process-local map with per-key expiry. Used when
//! no cache URL is configured, and by the test suites. Expired entries
//! are dropped lazily on access and during key scans.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::{Cache, CacheError};

enum Value {
    Scalar(String),
    Hash(HashMap<String, String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }
}

/// Process-local [`Cache`] implementation
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining TTL in whole seconds, or `None` when the key is absent,
    /// expired, or has no expiry. Test instrumentation only.
    pub fn ttl_remaining(&self, key: &str) -> Option<i64> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(key).filter(|e| e.live())?;
        let deadline = entry.expires_at?;
        Some(deadline.saturating_duration_since(Instant::now()).as_secs() as i64)
    }

    fn evict_if_expired(entries: &mut HashMap<String, Entry>, key: &str) {
        let expired = entries.get(key).is_some_and(|entry| !entry.live());
        if expired {
            entries.remove(key);
        }
    }
}

/// `*` matches exactly one `:`-segment; everything else matches literally.
fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split(':').collect();
    let key: Vec<&str> = key.split(':').collect();
    pattern.len() == key.len()
        && pattern
            .iter()
            .zip(&key)
            .all(|(p, k)| *p == "*" || p == k)
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        Self::evict_if_expired(&mut entries, key);
        match entries.get(key).map(|entry| &entry.value) {
            Some(Value::Scalar(s)) => Ok(Some(s.clone())),
            _ => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<i64>,
    ) -> Result<(), CacheError> {
        let expires_at = match ttl_seconds {
            Some(ttl) if ttl <= 0 => return Ok(()),
            Some(ttl) => Some(Instant::now() + Duration::from_secs(ttl as u64)),
            None => None,
        };
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Scalar(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        Self::evict_if_expired(&mut entries, key);
        Ok(entries.contains_key(key))
    }

    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap();
        if ttl_seconds <= 0 {
            entries.remove(key);
            return Ok(());
        }
        if let Some(entry) = entries.get_mut(key).filter(|e| e.live()) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_seconds as u64));
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| entry.live());
        Ok(entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.live() => match &entry.value {
                Value::Hash(fields) => Ok(fields.get(field).cloned()),
                Value::Scalar(_) => Ok(None),
            },
            _ => Ok(None),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .entry(key.to_string())
            .and_modify(|e| {
                if !e.live() || matches!(e.value, Value::Scalar(_)) {
                    e.value = Value::Hash(HashMap::new());
                    e.expires_at = None;
                }
            })
            .or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
        if let Value::Hash(fields) = &mut entry.value {
            fields.insert(field.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            if let Value::Hash(fields) = &mut entry.value {
                fields.remove(field);
            }
        }
        Ok(())
    }
}
