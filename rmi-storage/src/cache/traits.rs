//! Key-value cache trait and cache statistics.
//!
//! The engine talks to exactly one shared low-latency store. It is used as
//! the write buffer, the read cache, the composite-view cache and the
//! transport for the durable-persistence queue, so the trait covers plain
//! TTL'd strings plus a minimal list API.

use std::time::Duration;

use async_trait::async_trait;
use rmi_core::RmiResult;

/// Pluggable key-value cache backend.
///
/// This trait abstracts over different backends (e.g., Redis, LMDB,
/// in-memory). Implementations must be thread-safe and support concurrent
/// access. Values are opaque strings, in practice JSON documents.
///
/// Expired entries behave exactly like absent ones.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Get a value. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> RmiResult<Option<String>>;

    /// Set a value with a time-to-live, replacing any previous value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> RmiResult<()>;

    /// Delete a key. Returns whether something was removed.
    async fn del(&self, key: &str) -> RmiResult<bool>;

    /// Check whether a live key exists.
    async fn exists(&self, key: &str) -> RmiResult<bool>;

    /// Get many values in one round trip, positionally aligned with `keys`.
    ///
    /// The default issues one `get` per key and fails on the first error;
    /// backends with pipelining should override it.
    async fn mget(&self, keys: &[String]) -> RmiResult<Vec<Option<String>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Push to the head of a list. Returns the new list length.
    async fn lpush(&self, key: &str, value: &str) -> RmiResult<u64>;

    /// Pop from the tail of a list without blocking.
    async fn rpop(&self, key: &str) -> RmiResult<Option<String>>;

    /// Length of a list (0 when the key does not exist).
    async fn llen(&self, key: &str) -> RmiResult<u64>;

    /// Get cache statistics.
    async fn stats(&self) -> RmiResult<CacheStats>;

    /// Memory currently used and the configured ceiling, when the backend
    /// knows both. Backends without a ceiling return `Ok(None)`.
    async fn memory_usage(&self) -> RmiResult<Option<MemoryUsage>> {
        Ok(None)
    }
}

/// Memory used by a cache backend against its configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub max_bytes: u64,
}

impl MemoryUsage {
    /// Usage ratio (0.0 to 1.0+). A zero ceiling reports 0.0.
    pub fn ratio(&self) -> f64 {
        if self.max_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.max_bytes as f64
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
