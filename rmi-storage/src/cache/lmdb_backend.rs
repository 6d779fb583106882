//! LMDB-backed key-value cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! cache that survives process restarts, for single-node deployments that
//! run without a networked cache.
//!
//! # Value layout
//!
//! Every stored value is `[expires_at millis: 8 bytes LE][tag: 1 byte][body]`.
//! The tag distinguishes plain values (UTF-8 body) from lists (JSON array
//! body, head first). Expiry uses wall-clock time so TTLs survive restarts;
//! lists are stored with `i64::MAX` and never expire.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use rmi_core::{RmiError, RmiResult, StorageError};

use super::traits::{CacheStats, KeyValueCache, MemoryUsage};

const HEADER_LEN: usize = 9;
const TAG_VALUE: u8 = 0;
const TAG_LIST: u8 = 1;
const NO_EXPIRY: i64 = i64::MAX;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes do not follow the value layout.
    #[error("Corrupt entry for key {0}")]
    Corrupt(String),

    /// A list operation hit a plain value, or the reverse.
    #[error("Wrong kind of entry for key {0}")]
    WrongKind(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for RmiError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Corrupt(key) => RmiError::serialization(key, "corrupt cache entry"),
            other => StorageError::CacheUnavailable {
                reason: other.to_string(),
            }
            .into(),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// A decoded stored value.
enum Stored {
    Value(String),
    List(Vec<String>),
}

fn encode(expires_at: i64, stored: &Stored) -> Vec<u8> {
    let (tag, body) = match stored {
        Stored::Value(v) => (TAG_VALUE, v.as_bytes().to_vec()),
        // Vec<String> always serializes.
        Stored::List(items) => (TAG_LIST, serde_json::to_vec(items).unwrap_or_default()),
    };
    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(&expires_at.to_le_bytes());
    bytes.push(tag);
    bytes.extend_from_slice(&body);
    bytes
}

fn decode(key: &str, bytes: &[u8]) -> Result<(i64, Stored), LmdbCacheError> {
    if bytes.len() < HEADER_LEN {
        return Err(LmdbCacheError::Corrupt(key.to_string()));
    }
    let expiry_bytes: [u8; 8] = bytes[0..8]
        .try_into()
        .map_err(|_| LmdbCacheError::Corrupt(key.to_string()))?;
    let expires_at = i64::from_le_bytes(expiry_bytes);
    let body = &bytes[HEADER_LEN..];
    let stored = match bytes[8] {
        TAG_VALUE => Stored::Value(
            String::from_utf8(body.to_vec()).map_err(|_| LmdbCacheError::Corrupt(key.to_string()))?,
        ),
        TAG_LIST => Stored::List(
            serde_json::from_slice(body).map_err(|_| LmdbCacheError::Corrupt(key.to_string()))?,
        ),
        _ => return Err(LmdbCacheError::Corrupt(key.to_string())),
    };
    Ok((expires_at, stored))
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// LMDB-backed [`KeyValueCache`].
///
/// # Example
///
/// ```ignore
/// use rmi_storage::cache::LmdbKeyValueCache;
///
/// let cache = LmdbKeyValueCache::new("/var/lib/rmi/cache", 512)?;
/// cache.set("citizen:12345678909", "{}", Duration::from_secs(3600)).await?;
/// ```
pub struct LmdbKeyValueCache {
    env: Env,
    db: Database<Bytes, Bytes>,
    map_size_bytes: u64,
    stats: Arc<RwLock<CacheStats>>,
}

impl LmdbKeyValueCache {
    /// Open (or create) the cache under `path` with a map size of
    /// `max_size_mb` megabytes.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let map_size = max_size_mb * 1024 * 1024;
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            map_size_bytes: map_size as u64,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        })
    }

    fn bump<F: FnOnce(&mut CacheStats)>(&self, f: F) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    /// Read a live entry. Expired entries are reported as absent; they are
    /// physically removed on the next write to the same key.
    fn read_live(&self, key: &str) -> Result<Option<Stored>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let Some(bytes) = self.db.get(&rtxn, key.as_bytes()).map_err(txn_err)? else {
            return Ok(None);
        };
        let (expires_at, stored) = decode(key, bytes)?;
        if expires_at <= now_millis() {
            return Ok(None);
        }
        Ok(Some(stored))
    }

    /// Live entry inside a write transaction, purging it if expired.
    fn take_live(&self, wtxn: &mut RwTxn<'_>, key: &str) -> Result<Option<Stored>, LmdbCacheError> {
        let decoded = match self.db.get(wtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => Some(decode(key, bytes)?),
            None => None,
        };
        match decoded {
            None => Ok(None),
            Some((expires_at, _)) if expires_at <= now_millis() => {
                self.db.delete(wtxn, key.as_bytes()).map_err(txn_err)?;
                self.bump(|s| {
                    s.expirations += 1;
                    s.entry_count = s.entry_count.saturating_sub(1);
                });
                Ok(None)
            }
            Some((_, stored)) => Ok(Some(stored)),
        }
    }

    fn used_bytes(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut used = 0u64;
        for entry in self.db.iter(&rtxn).map_err(txn_err)? {
            let (key, value) = entry.map_err(txn_err)?;
            used += (key.len() + value.len()) as u64;
        }
        Ok(used)
    }

    fn count_live(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let now = now_millis();
        let mut live = 0u64;
        for entry in self.db.iter(&rtxn).map_err(txn_err)? {
            let (_, value) = entry.map_err(txn_err)?;
            if value.len() >= 8 {
                let mut expiry = [0u8; 8];
                expiry.copy_from_slice(&value[0..8]);
                if i64::from_le_bytes(expiry) > now {
                    live += 1;
                }
            }
        }
        Ok(live)
    }
}

#[async_trait]
impl KeyValueCache for LmdbKeyValueCache {
    async fn get(&self, key: &str) -> RmiResult<Option<String>> {
        match self.read_live(key)? {
            Some(Stored::Value(v)) => {
                self.bump(|s| s.hits += 1);
                Ok(Some(v))
            }
            Some(Stored::List(_)) | None => {
                self.bump(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> RmiResult<()> {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_millis().saturating_add(ttl_millis);
        let bytes = encode(expires_at, &Stored::Value(value.to_string()));

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let is_new = self.take_live(&mut wtxn, key)?.is_none();
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        if is_new {
            self.bump(|s| s.entry_count += 1);
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> RmiResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let was_live = self.take_live(&mut wtxn, key)?.is_some();
        if was_live {
            self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;

        if was_live {
            self.bump(|s| s.entry_count = s.entry_count.saturating_sub(1));
        }
        Ok(was_live)
    }

    async fn exists(&self, key: &str) -> RmiResult<bool> {
        Ok(self.read_live(key)?.is_some())
    }

    async fn lpush(&self, key: &str, value: &str) -> RmiResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let (mut items, is_new) = match self.take_live(&mut wtxn, key)? {
            Some(Stored::List(items)) => (items, false),
            Some(Stored::Value(_)) => return Err(LmdbCacheError::WrongKind(key.to_string()).into()),
            None => (Vec::new(), true),
        };
        items.insert(0, value.to_string());
        let len = items.len() as u64;
        self.db
            .put(&mut wtxn, key.as_bytes(), &encode(NO_EXPIRY, &Stored::List(items)))
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        if is_new {
            self.bump(|s| s.entry_count += 1);
        }
        Ok(len)
    }

    async fn rpop(&self, key: &str) -> RmiResult<Option<String>> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut items = match self.take_live(&mut wtxn, key)? {
            Some(Stored::List(items)) => items,
            Some(Stored::Value(_)) => return Err(LmdbCacheError::WrongKind(key.to_string()).into()),
            None => return Ok(None),
        };
        let popped = items.pop();
        let now_empty = items.is_empty();
        if now_empty {
            self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        } else {
            self.db
                .put(&mut wtxn, key.as_bytes(), &encode(NO_EXPIRY, &Stored::List(items)))
                .map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;

        if now_empty {
            self.bump(|s| s.entry_count = s.entry_count.saturating_sub(1));
        }
        Ok(popped)
    }

    async fn llen(&self, key: &str) -> RmiResult<u64> {
        Ok(match self.read_live(key)? {
            Some(Stored::List(items)) => items.len() as u64,
            _ => 0,
        })
    }

    async fn stats(&self) -> RmiResult<CacheStats> {
        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.entry_count = self.count_live()?;
        stats.memory_bytes = self.used_bytes()?;
        Ok(stats)
    }

    async fn memory_usage(&self) -> RmiResult<Option<MemoryUsage>> {
        Ok(Some(MemoryUsage {
            used_bytes: self.used_bytes()?,
            max_bytes: self.map_size_bytes,
        }))
    }
}
