//! Batched multi-key reads and writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rmi_core::RmiResult;
use tracing::{debug, warn};

use super::traits::KeyValueCache;
use crate::deadline::with_deadline;

/// Fetches many cache keys in one round trip.
///
/// A batch read never fails: keys that are missing, expired or individually
/// unreadable are simply absent from the result.
#[derive(Clone)]
pub struct BatchReader {
    cache: Arc<dyn KeyValueCache>,
    deadline: Duration,
}

impl BatchReader {
    pub fn new(cache: Arc<dyn KeyValueCache>, deadline: Duration) -> Self {
        Self { cache, deadline }
    }

    /// Read every key it can. The result's keys are a subset of `keys`.
    ///
    /// Uses one pipelined `mget`; if that call fails as a whole, falls back
    /// to one `get` per key and keeps whatever succeeds.
    pub async fn read_many(&self, keys: &[String]) -> HashMap<String, String> {
        let mut found = HashMap::with_capacity(keys.len());
        if keys.is_empty() {
            return found;
        }

        match with_deadline(self.deadline, "cache.mget", self.cache.mget(keys)).await {
            Ok(values) => {
                for (key, value) in keys.iter().zip(values) {
                    if let Some(value) = value {
                        found.insert(key.clone(), value);
                    }
                }
            }
            Err(e) => {
                warn!(keys = keys.len(), error = %e, "batch read failed, falling back to single reads");
                for key in keys {
                    match with_deadline(self.deadline, "cache.get", self.cache.get(key)).await {
                        Ok(Some(value)) => {
                            found.insert(key.clone(), value);
                        }
                        Ok(None) => {}
                        Err(e) => debug!(key = %key, error = %e, "single read failed"),
                    }
                }
            }
        }

        found
    }

    /// Write every entry with the same TTL. Stops at the first failure.
    pub async fn write_many(&self, entries: &[(String, String)], ttl: Duration) -> RmiResult<()> {
        for (key, value) in entries {
            with_deadline(self.deadline, "cache.set", self.cache.set(key, value, ttl)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryKeyValueCache;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use rmi_core::{RmiError, StorageError};
    use std::collections::HashSet;

    use crate::cache::traits::CacheStats;

    /// Cache whose `mget` always fails and whose `get` fails for one key.
    struct BrokenPipeline {
        inner: InMemoryKeyValueCache,
        poisoned_key: String,
    }

    fn down() -> RmiError {
        StorageError::CacheUnavailable {
            reason: "pipeline broken".to_string(),
        }
        .into()
    }

    #[async_trait]
    impl KeyValueCache for BrokenPipeline {
        async fn get(&self, key: &str) -> RmiResult<Option<String>> {
            if key == self.poisoned_key {
                return Err(down());
            }
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Duration) -> RmiResult<()> {
            self.inner.set(key, value, ttl).await
        }
        async fn del(&self, key: &str) -> RmiResult<bool> {
            self.inner.del(key).await
        }
        async fn exists(&self, key: &str) -> RmiResult<bool> {
            self.inner.exists(key).await
        }
        async fn mget(&self, _keys: &[String]) -> RmiResult<Vec<Option<String>>> {
            Err(down())
        }
        async fn lpush(&self, key: &str, value: &str) -> RmiResult<u64> {
            self.inner.lpush(key, value).await
        }
        async fn rpop(&self, key: &str) -> RmiResult<Option<String>> {
            self.inner.rpop(key).await
        }
        async fn llen(&self, key: &str) -> RmiResult<u64> {
            self.inner.llen(key).await
        }
        async fn stats(&self) -> RmiResult<CacheStats> {
            self.inner.stats().await
        }
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_missing_keys_are_absent() {
        let cache = InMemoryKeyValueCache::new();
        cache.set("a", "1", Duration::from_secs(60)).await.unwrap();
        let reader = BatchReader::new(Arc::new(cache), Duration::from_secs(1));

        let found = reader.read_many(&keys(&["a", "b"])).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found["a"], "1");
    }

    #[tokio::test]
    async fn test_empty_request() {
        let reader = BatchReader::new(Arc::new(InMemoryKeyValueCache::new()), Duration::from_secs(1));
        assert!(reader.read_many(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_failure_falls_back_per_key() {
        let inner = InMemoryKeyValueCache::new();
        for key in ["a", "b", "c"] {
            inner.set(key, key, Duration::from_secs(60)).await.unwrap();
        }
        let cache = BrokenPipeline {
            inner,
            poisoned_key: "b".to_string(),
        };
        let reader = BatchReader::new(Arc::new(cache), Duration::from_secs(1));

        let found = reader.read_many(&keys(&["a", "b", "c", "d"])).await;
        let got: HashSet<_> = found.keys().cloned().collect();
        assert_eq!(got, HashSet::from(["a".to_string(), "c".to_string()]));
    }

    #[tokio::test]
    async fn test_write_many_then_read_many() {
        let reader = BatchReader::new(Arc::new(InMemoryKeyValueCache::new()), Duration::from_secs(1));
        let entries = vec![
            ("x".to_string(), "1".to_string()),
            ("y".to_string(), "2".to_string()),
        ];
        reader.write_many(&entries, Duration::from_secs(60)).await.unwrap();
        let found = reader.read_many(&keys(&["x", "y"])).await;
        assert_eq!(found["x"], "1");
        assert_eq!(found["y"], "2");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_result_is_exactly_the_stored_subset(
            stored in proptest::collection::hash_set("[a-f]{1,3}", 0..12),
            requested in proptest::collection::vec("[a-f]{1,3}", 0..16),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let found = rt.block_on(async {
                let cache = InMemoryKeyValueCache::new();
                for key in &stored {
                    cache.set(key, &format!("v-{}", key), Duration::from_secs(60)).await.unwrap();
                }
                BatchReader::new(Arc::new(cache), Duration::from_secs(1))
                    .read_many(&requested)
                    .await
            });

            for (key, value) in &found {
                prop_assert!(requested.contains(key));
                prop_assert_eq!(value, &format!("v-{}", key));
            }
            for key in &requested {
                prop_assert_eq!(found.contains_key(key), stored.contains(key));
            }
        }
    }
}
