//! Tiered read manager.
//!
//! Reads one entity for one citizen through the write buffer, the read
//! cache and the durable store, repopulating the read cache when the value
//! had to come from the store.

use std::sync::Arc;

use rmi_core::{CitizenId, EngineConfig, EntityKind, RmiError, RmiResult, SubFieldKind, SubFieldRecord};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{resolve_tiers, CacheKey, CacheTier, KeyValueCache, Resolved, TierRead, TierSource};
use crate::deadline::with_deadline;
use crate::durable::{DurableStore, Filter};

/// Tiered reads plus the cache maintenance operations around them.
#[derive(Clone)]
pub struct DataManager {
    cache: Arc<dyn KeyValueCache>,
    store: Arc<dyn DurableStore>,
    config: EngineConfig,
}

impl DataManager {
    pub fn new(cache: Arc<dyn KeyValueCache>, store: Arc<dyn DurableStore>, config: EngineConfig) -> Self {
        Self { cache, store, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Durable collection an entity lives in.
    pub fn collection_for(&self, entity: EntityKind) -> &str {
        match entity {
            EntityKind::Citizen => &self.config.collections.citizens,
            EntityKind::SelfDeclared(_) => &self.config.collections.self_declared,
        }
    }

    /// Read a document, failing with `NotFound` when no tier has it.
    pub async fn read(&self, cpf: &CitizenId, entity: EntityKind) -> RmiResult<Value> {
        self.read_resolved(cpf, entity)
            .await?
            .map(Resolved::into_value)
            .ok_or_else(|| RmiError::not_found(entity.type_name(), cpf.as_str()))
    }

    /// Read a document and report which tier produced it.
    pub async fn read_resolved(&self, cpf: &CitizenId, entity: EntityKind) -> RmiResult<Option<Resolved<Value>>> {
        let label = format!("{}:{}", entity.type_name(), cpf);
        let resolved = resolve_tiers(&label, &TierSource::CHAIN, |source| {
            self.read_tier(cpf, entity, source)
        })
        .await?;

        if let Some(found) = &resolved {
            if found.needs_repopulate() {
                self.repopulate(cpf, entity, &found.value).await;
            }
        }
        Ok(resolved)
    }

    /// Read and deserialize. A value that does not decode is a backend error.
    pub async fn read_as<T: DeserializeOwned>(&self, cpf: &CitizenId, entity: EntityKind) -> RmiResult<T> {
        let value = self.read(cpf, entity).await?;
        serde_json::from_value(value).map_err(|e| RmiError::serialization(entity.type_name(), e))
    }

    /// Like [`read_as`](Self::read_as) but a missing document yields
    /// `T::default()`.
    pub async fn read_or_default<T: DeserializeOwned + Default>(
        &self,
        cpf: &CitizenId,
        entity: EntityKind,
    ) -> RmiResult<T> {
        match self.read_as(cpf, entity).await {
            Err(e) if e.is_not_found() => Ok(T::default()),
            other => other,
        }
    }

    /// Current self-declared value of one sub-field, with its timestamp.
    pub async fn read_sub_field(&self, cpf: &CitizenId, kind: SubFieldKind) -> RmiResult<Option<SubFieldRecord>> {
        match self.read_resolved(cpf, kind.into()).await? {
            Some(found) => SubFieldRecord::from_document(kind, cpf, &found.value),
            None => Ok(None),
        }
    }

    /// Drop both cached copies of an entity. The durable document is kept.
    pub async fn delete(&self, cpf: &CitizenId, entity: EntityKind) -> RmiResult<()> {
        for key in [CacheKey::write_buffer(entity, cpf), CacheKey::read_cache(entity, cpf)] {
            let encoded = key.encode();
            with_deadline(self.config.backend_timeout, "cache.del", self.cache.del(&encoded)).await?;
        }
        debug!(cpf = %cpf, entity = %entity, "cached copies deleted");
        Ok(())
    }

    /// Remove the write buffer entry once its content is durable.
    pub async fn cleanup_write_buffer(&self, cpf: &CitizenId, entity: EntityKind) -> RmiResult<bool> {
        let key = CacheKey::write_buffer(entity, cpf).encode();
        let removed = with_deadline(self.config.backend_timeout, "cache.del", self.cache.del(&key))
            .await
            .inspect_err(|e| warn!(key = %key, error = %e, "failed to cleanup write buffer"))?;
        debug!(key = %key, removed, "write buffer cleaned up");
        Ok(removed)
    }

    /// Refresh the read cache with a known-good value (short TTL).
    pub async fn update_read_cache(&self, cpf: &CitizenId, entity: EntityKind, value: &Value) -> RmiResult<()> {
        let key = CacheKey::read_cache(entity, cpf).encode();
        let raw = serde_json::to_string(value).map_err(|e| RmiError::serialization(&key, e))?;
        with_deadline(
            self.config.backend_timeout,
            "cache.set",
            self.cache.set(&key, &raw, self.config.read_cache_refresh_ttl),
        )
        .await
    }

    async fn read_tier(&self, cpf: &CitizenId, entity: EntityKind, source: TierSource) -> TierRead<Value> {
        match source {
            TierSource::WriteBuffer => self.read_cache_tier(CacheKey::write_buffer(entity, cpf)).await,
            TierSource::ReadCache => self.read_cache_tier(CacheKey::read_cache(entity, cpf)).await,
            TierSource::DurableStore => self.read_durable(cpf, entity).await,
        }
    }

    async fn read_cache_tier(&self, key: CacheKey) -> TierRead<Value> {
        let encoded = key.encode();
        let raw = with_deadline(self.config.backend_timeout, "cache.get", self.cache.get(&encoded)).await;
        TierRead::from(raw).and_then(|raw| {
            serde_json::from_str::<Value>(&raw).map_err(|e| RmiError::serialization(&encoded, e))
        })
    }

    async fn read_durable(&self, cpf: &CitizenId, entity: EntityKind) -> TierRead<Value> {
        let collection = self.collection_for(entity);
        let filter = Filter::by_cpf(cpf.as_str());
        let found = match entity {
            EntityKind::Citizen => {
                with_deadline(
                    self.config.backend_timeout,
                    "store.find_one",
                    self.store.find_one(collection, &filter, None),
                )
                .await
            }
            EntityKind::SelfDeclared(kind) => {
                let fields = ["cpf", kind.payload_field(), "updated_at"];
                with_deadline(
                    self.config.backend_timeout,
                    "store.find_one",
                    self.store.find_one(collection, &filter, Some(&fields[..])),
                )
                .await
                .map(|doc| {
                    // A self-declared document without this field is a miss.
                    doc.filter(|d| d.get(kind.payload_field()).is_some_and(|v| !v.is_null()))
                })
            }
        };
        TierRead::from(found)
    }

    /// Best-effort: a failed repopulate is logged and never retried.
    async fn repopulate(&self, cpf: &CitizenId, entity: EntityKind, value: &Value) {
        let key = CacheKey::read_cache(entity, cpf).encode();
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to encode value for read cache");
                return;
            }
        };
        let ttl = CacheTier::ReadCache.ttl(&self.config);
        match with_deadline(self.config.backend_timeout, "cache.set", self.cache.set(&key, &raw, ttl)).await {
            Ok(()) => debug!(key = %key, "read cache repopulated from durable store"),
            Err(e) => warn!(key = %key, error = %e, "failed to repopulate read cache"),
        }
    }
}
