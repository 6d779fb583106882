//! Cache layer: one shared key-value store playing several roles.
//!
//! The same [`KeyValueCache`] holds the write buffer, the read cache, the
//! composite-view cache and the sync queues. What distinguishes them is the
//! key, and keys can only be built through [`CacheKey`], so every role gets
//! its own namespace and TTL.
//!
//! # Read chain
//!
//! Reads walk [`TierSource::CHAIN`] through [`resolve_tiers`]: write buffer,
//! read cache, durable store. A tier that fails is logged and skipped; only
//! the durable store's failure reaches the caller.
//!
//! # Example
//!
//! ```ignore
//! let key = CacheKey::write_buffer(SubFieldKind::Email, &cpf);
//! cache.set(&key.encode(), &payload, CacheTier::WriteBuffer.ttl(&config)).await?;
//! ```

pub mod batch;
pub mod keys;
pub mod lmdb_backend;
pub mod memory;
pub mod tier;
pub mod traits;

pub use batch::BatchReader;
pub use keys::{CacheKey, CacheTier};
pub use lmdb_backend::{LmdbCacheError, LmdbKeyValueCache};
pub use memory::InMemoryKeyValueCache;
pub use tier::{resolve_tiers, Resolved, TierRead, TierSource};
pub use traits::{CacheStats, KeyValueCache, MemoryUsage};
