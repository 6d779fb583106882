//! RMI Storage - Cache Tiers, Durable Store and Sync Queue
//!
//! Defines the storage seams the engine is written against (key-value
//! cache, durable document store, verification store) with in-memory and
//! LMDB implementations, plus the read-side building blocks: the typed key
//! builder, the tiered read manager, batched reads and the sync queue.

pub mod cache;
pub mod data_manager;
pub mod deadline;
pub mod durable;
pub mod queue;
pub mod verification_store;

pub use cache::{
    resolve_tiers, BatchReader, CacheKey, CacheStats, CacheTier, InMemoryKeyValueCache,
    KeyValueCache, LmdbCacheError, LmdbKeyValueCache, MemoryUsage, Resolved, TierRead, TierSource,
};
pub use data_manager::DataManager;
pub use deadline::with_deadline;
pub use durable::{project, Condition, DurableStore, Filter, InMemoryDurableStore};
pub use queue::SyncQueue;
pub use verification_store::{DocumentVerificationStore, VerificationStore};
