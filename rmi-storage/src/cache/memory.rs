//! In-process key-value cache.
//!
//! Backs tests and single-node deployments. TTLs are enforced lazily on
//! access, exactly like an absent key.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rmi_core::{RmiResult, StorageError};
use tokio::time::Instant;

use super::traits::{CacheStats, KeyValueCache, MemoryUsage};

#[derive(Debug, Clone)]
enum Slot {
    Value(String),
    List(VecDeque<String>),
}

impl Slot {
    fn size_bytes(&self) -> u64 {
        match self {
            Slot::Value(v) => v.len() as u64,
            Slot::List(items) => items.iter().map(|i| i.len() as u64).sum(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory [`KeyValueCache`].
///
/// Lists never expire. An optional `max_memory_bytes` ceiling is only
/// reported through `memory_usage`, it is never enforced by eviction.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyValueCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    max_memory_bytes: Option<u64>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    expirations: Arc<AtomicU64>,
}

impl InMemoryKeyValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_memory(mut self, max_bytes: u64) -> Self {
        self.max_memory_bytes = Some(max_bytes);
        self
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|e| e.values().filter(|entry| !entry.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Remaining TTL of a live string entry.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.read().ok()?;
        let entry = entries.get(key)?;
        let at = entry.expires_at?;
        if at <= now {
            None
        } else {
            Some(at - now)
        }
    }

    fn used_bytes(&self) -> RmiResult<u64> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries
            .iter()
            .map(|(k, e)| k.len() as u64 + e.slot.size_bytes())
            .sum())
    }

    /// Read a live string slot, dropping it if it has expired.
    fn live_value(&self, key: &str) -> RmiResult<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => {
                    return Ok(match &entry.slot {
                        Slot::Value(v) => Some(v.clone()),
                        Slot::List(_) => None,
                    });
                }
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(None)
    }
}

#[async_trait]
impl KeyValueCache for InMemoryKeyValueCache {
    async fn get(&self, key: &str) -> RmiResult<Option<String>> {
        let value = self.live_value(key)?;
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> RmiResult<()> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Value(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> RmiResult<bool> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let now = Instant::now();
        Ok(entries.remove(key).is_some_and(|e| !e.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> RmiResult<bool> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(key).is_some_and(|e| !e.is_expired(now)))
    }

    async fn mget(&self, keys: &[String]) -> RmiResult<Vec<Option<String>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn lpush(&self, key: &str, value: &str) -> RmiResult<u64> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::List(items) => {
                items.push_front(value.to_string());
                Ok(items.len() as u64)
            }
            Slot::Value(_) => Err(StorageError::CacheUnavailable {
                reason: format!("key {} holds a value, not a list", key),
            }
            .into()),
        }
    }

    async fn rpop(&self, key: &str) -> RmiResult<Option<String>> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        let (popped, now_empty) = match &mut entry.slot {
            Slot::List(items) => {
                let popped = items.pop_back();
                (popped, items.is_empty())
            }
            Slot::Value(_) => {
                return Err(StorageError::CacheUnavailable {
                    reason: format!("key {} holds a value, not a list", key),
                }
                .into())
            }
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(popped)
    }

    async fn llen(&self, key: &str) -> RmiResult<u64> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(match entries.get(key).map(|e| &e.slot) {
            Some(Slot::List(items)) => items.len() as u64,
            _ => 0,
        })
    }

    async fn stats(&self) -> RmiResult<CacheStats> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
            memory_bytes: self.used_bytes()?,
            expirations: self.expirations.load(Ordering::Relaxed),
        })
    }

    async fn memory_usage(&self) -> RmiResult<Option<MemoryUsage>> {
        match self.max_memory_bytes {
            Some(max_bytes) => Ok(Some(MemoryUsage {
                used_bytes: self.used_bytes()?,
                max_bytes,
            })),
            None => Ok(None),
        }
    }
}
