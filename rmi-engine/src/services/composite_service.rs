//! Composite citizen view: the authoritative record with the citizen's
//! self-declared values laid over it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rmi_core::{
    Citizen, CitizenId, EngineConfig, EntityKind, RmiError, RmiResult, SelfDeclaredSet,
    SubFieldKind, SubFieldRecord,
};
use rmi_storage::{
    with_deadline, BatchReader, CacheKey, DataManager, DurableStore, Filter, KeyValueCache,
    TierSource,
};
use tracing::{debug, warn};

use crate::telemetry::with_metrics;

// ============================================================================
// COMPOSITE CACHE
// ============================================================================

/// The optional `citizen:<cpf>` cache of merged views.
///
/// When disabled every operation is a no-op: reads miss, writes and
/// invalidations succeed without touching the cache.
#[derive(Clone)]
pub struct CompositeCache {
    cache: Option<Arc<dyn KeyValueCache>>,
    ttl: Duration,
    deadline: Duration,
}

impl CompositeCache {
    pub fn new(cache: Arc<dyn KeyValueCache>, config: &EngineConfig) -> Self {
        Self {
            cache: config.composite_cache_enabled.then_some(cache),
            ttl: config.composite_ttl,
            deadline: config.backend_timeout,
        }
    }

    pub fn disabled() -> Self {
        Self {
            cache: None,
            ttl: Duration::ZERO,
            deadline: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub async fn get(&self, cpf: &CitizenId) -> RmiResult<Option<Citizen>> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let key = CacheKey::composite(cpf).encode();
        let Some(raw) = with_deadline(self.deadline, "cache.get", cache.get(&key)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| RmiError::serialization(&key, e))
    }

    pub async fn put(&self, citizen: &Citizen, cpf: &CitizenId) -> RmiResult<()> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        let key = CacheKey::composite(cpf).encode();
        let raw = serde_json::to_string(citizen).map_err(|e| RmiError::serialization(&key, e))?;
        with_deadline(self.deadline, "cache.set", cache.set(&key, &raw, self.ttl)).await
    }

    pub async fn invalidate(&self, cpf: &CitizenId) -> RmiResult<()> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        let key = CacheKey::composite(cpf).encode();
        with_deadline(self.deadline, "cache.del", cache.del(&key)).await?;
        debug!(cpf = %cpf, "composite view invalidated");
        Ok(())
    }

    pub async fn contains(&self, cpf: &CitizenId) -> RmiResult<bool> {
        let Some(cache) = &self.cache else {
            return Ok(false);
        };
        let key = CacheKey::composite(cpf).encode();
        with_deadline(self.deadline, "cache.exists", cache.exists(&key)).await
    }
}

// ============================================================================
// MERGE
// ============================================================================

/// Lay self-declared values over an authoritative record.
pub fn merge_self_declared(mut citizen: Citizen, declared: &SelfDeclaredSet) -> Citizen {
    if let Some(principal) = declared.address().and_then(|a| a.principal.clone()) {
        let endereco = citizen.endereco.get_or_insert_with(Default::default);
        endereco.principal = Some(principal);
        endereco.indicador.get_or_insert(true);
    }

    if let Some(principal) = declared.email().and_then(|e| e.principal.clone()) {
        let email = citizen.email.get_or_insert_with(Default::default);
        email.principal = Some(principal);
        email.indicador.get_or_insert(true);
    }

    // An unverified self-declared phone stays hidden.
    if let Some(phone) = declared.phone().filter(|p| p.is_verified()) {
        if let Some(principal) = phone.principal.clone() {
            let telefone = citizen.telefone.get_or_insert_with(Default::default);
            telefone.principal = Some(principal);
            telefone.indicador = Some(true);
        }
    }

    if let Some(raca) = declared.ethnicity() {
        citizen.raca = Some(raca.to_string());
    }

    citizen.nome_exibicao = declared.display_name().map(str::to_string);
    citizen
}

// ============================================================================
// SERVICE
// ============================================================================

#[derive(Clone)]
pub struct CompositeService {
    data: DataManager,
    batch: BatchReader,
    store: Arc<dyn DurableStore>,
    cache: CompositeCache,
    config: EngineConfig,
}

impl CompositeService {
    pub fn new(
        data: DataManager,
        batch: BatchReader,
        store: Arc<dyn DurableStore>,
        cache: CompositeCache,
    ) -> Self {
        let config = data.config().clone();
        Self {
            data,
            batch,
            store,
            cache,
            config,
        }
    }

    /// The merged view of a citizen.
    ///
    /// Fails with `NotFound` only when there is neither an authoritative
    /// record nor any self-declared value.
    pub async fn read_composite(&self, cpf: &CitizenId) -> RmiResult<Citizen> {
        match self.cache.get(cpf).await {
            Ok(Some(cached)) => {
                debug!(cpf = %cpf, "composite cache hit");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => warn!(cpf = %cpf, error = %e, "composite cache read failed"),
        }

        let authoritative = match self.data.read_as::<Citizen>(cpf, EntityKind::Citizen).await {
            Ok(citizen) => Some(citizen),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        let declared = self.load_self_declared(cpf).await?;

        if authoritative.is_none() && declared.is_empty() {
            return Err(RmiError::not_found("citizen", cpf.as_str()));
        }

        let merged = merge_self_declared(
            authoritative.unwrap_or_else(|| Citizen::empty(cpf)),
            &declared,
        );
        if let Err(e) = self.cache.put(&merged, cpf).await {
            warn!(cpf = %cpf, error = %e, "failed to cache composite view");
        }
        Ok(merged)
    }

    /// The cached composite view, without merging on a miss.
    pub async fn read_cached_only(&self, cpf: &CitizenId) -> RmiResult<Option<Citizen>> {
        self.cache.get(cpf).await
    }

    pub async fn is_cached(&self, cpf: &CitizenId) -> RmiResult<bool> {
        self.cache.contains(cpf).await
    }

    pub async fn invalidate(&self, cpf: &CitizenId) -> RmiResult<()> {
        self.cache.invalidate(cpf).await
    }

    /// Gather every self-declared sub-field for a citizen, freshest tier
    /// first: one batched read of the write buffer, one of the read cache,
    /// then a single projected durable query for whatever is still missing.
    pub async fn load_self_declared(&self, cpf: &CitizenId) -> RmiResult<SelfDeclaredSet> {
        let mut declared = SelfDeclaredSet::new();

        for source in TierSource::CHAIN {
            let missing = declared.missing();
            if missing.is_empty() {
                break;
            }
            let found = match source {
                TierSource::WriteBuffer | TierSource::ReadCache => {
                    self.read_cache_tier(cpf, source, &missing).await
                }
                TierSource::DurableStore => match self.read_durable_tier(cpf, &missing).await {
                    Ok(found) => found,
                    // Partial data beats none when the store is down.
                    Err(e) if !declared.is_empty() => {
                        warn!(cpf = %cpf, error = %e, "self-declared durable read failed");
                        Vec::new()
                    }
                    Err(e) => return Err(e),
                },
            };

            let mut accepted = 0;
            for record in found {
                if declared.accept(record) {
                    accepted += 1;
                }
            }
            if accepted > 0 {
                with_metrics(|m| m.record_tier_hit(source.as_str(), accepted));
            }
            debug!(cpf = %cpf, tier = %source, accepted, "self-declared tier read");
        }

        Ok(declared)
    }

    async fn read_cache_tier(
        &self,
        cpf: &CitizenId,
        source: TierSource,
        missing: &[SubFieldKind],
    ) -> Vec<SubFieldRecord> {
        let keys: HashMap<String, SubFieldKind> = missing
            .iter()
            .map(|kind| {
                let key = match source {
                    TierSource::WriteBuffer => CacheKey::write_buffer(*kind, cpf),
                    _ => CacheKey::read_cache(*kind, cpf),
                };
                (key.encode(), *kind)
            })
            .collect();
        let requested: Vec<String> = keys.keys().cloned().collect();

        self.batch
            .read_many(&requested)
            .await
            .into_iter()
            .filter_map(|(key, raw)| {
                let kind = *keys.get(&key)?;
                decode_sub_field(kind, cpf, &raw)
                    .inspect_err(|e| warn!(key = %key, error = %e, "skipping undecodable sub-field"))
                    .ok()
                    .flatten()
            })
            .collect()
    }

    async fn read_durable_tier(
        &self,
        cpf: &CitizenId,
        missing: &[SubFieldKind],
    ) -> RmiResult<Vec<SubFieldRecord>> {
        let mut fields = vec!["cpf", "updated_at"];
        fields.extend(missing.iter().map(|kind| kind.payload_field()));

        let doc = with_deadline(
            self.config.backend_timeout,
            "store.find_one",
            self.store.find_one(
                &self.config.collections.self_declared,
                &Filter::by_cpf(cpf.as_str()),
                Some(&fields[..]),
            ),
        )
        .await?;
        let Some(doc) = doc else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for kind in missing {
            match SubFieldRecord::from_document(*kind, cpf, &doc) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(cpf = %cpf, field = %kind, error = %e, "skipping undecodable sub-field"),
            }
        }
        Ok(records)
    }
}

fn decode_sub_field(kind: SubFieldKind, cpf: &CitizenId, raw: &str) -> RmiResult<Option<SubFieldRecord>> {
    let doc: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| RmiError::serialization(kind.type_name(), e))?;
    SubFieldRecord::from_document(kind, cpf, &doc)
}
