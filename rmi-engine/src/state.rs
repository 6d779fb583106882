//! Engine context shared by every entry point.
//!
//! Built once from configuration; every service holds cheap clones of the
//! same backend handles.

use std::sync::Arc;

use rmi_core::{
    Citizen, CitizenId, EngineConfig, PhoneInput, RmiError, RmiResult, SubFieldInput,
    VerificationOutcome,
};
use rmi_storage::{
    BatchReader, DataManager, DocumentVerificationStore, DurableStore, InMemoryDurableStore,
    InMemoryKeyValueCache, KeyValueCache, LmdbKeyValueCache, SyncQueue, VerificationStore,
};

use crate::config::{CacheBackend, EngineSettings, WorkerConfig};
use crate::error::ApiResult;
use crate::jobs::{BackendHealthProbe, DegradedMode, SyncWorker};
use crate::services::{
    CacheService, CodeNotifier, CompositeCache, CompositeService, PendingVerification,
    PhoneVerificationService,
};

/// What a sub-field update left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubFieldUpdate {
    /// Buffered and queued; readable right away.
    Written,
    /// A phone waiting for its code. Nothing was written yet.
    VerificationPending(PendingVerification),
}

#[derive(Clone)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub cache: Arc<dyn KeyValueCache>,
    pub store: Arc<dyn DurableStore>,
    pub data: DataManager,
    pub batch: BatchReader,
    pub queue: SyncQueue,
    pub writes: CacheService,
    pub composite: CompositeService,
    pub verification: PhoneVerificationService,
}

impl EngineContext {
    /// Wire the services over the given backends.
    ///
    /// Without a notifier, issued codes are only stored; delivering them is
    /// then somebody else's job.
    pub fn new(
        cache: Arc<dyn KeyValueCache>,
        store: Arc<dyn DurableStore>,
        config: EngineConfig,
        notifier: Option<Arc<dyn CodeNotifier>>,
    ) -> RmiResult<Self> {
        config.validate()?;
        let deadline = config.backend_timeout;

        let data = DataManager::new(cache.clone(), store.clone(), config.clone());
        let batch = BatchReader::new(cache.clone(), deadline);
        let queue = SyncQueue::new(cache.clone(), deadline);
        let composite_cache = CompositeCache::new(cache.clone(), &config);

        let writes = CacheService::new(
            cache.clone(),
            data.clone(),
            queue.clone(),
            composite_cache.clone(),
        );
        let composite = CompositeService::new(
            data.clone(),
            batch.clone(),
            store.clone(),
            composite_cache.clone(),
        );
        let verifications: Arc<dyn VerificationStore> = Arc::new(DocumentVerificationStore::new(
            store.clone(),
            config.collections.phone_verifications.as_str(),
        ));
        let verification = PhoneVerificationService::new(
            verifications,
            writes.clone(),
            composite_cache,
            notifier,
            config.verification_ttl,
            deadline,
        );

        Ok(Self {
            config,
            cache,
            store,
            data,
            batch,
            queue,
            writes,
            composite,
            verification,
        })
    }

    /// Build the backends named by `settings`, then the context.
    pub fn from_settings(
        settings: &EngineSettings,
        notifier: Option<Arc<dyn CodeNotifier>>,
    ) -> ApiResult<Self> {
        let cache: Arc<dyn KeyValueCache> = match &settings.cache_backend {
            CacheBackend::Memory => Arc::new(InMemoryKeyValueCache::new()),
            CacheBackend::Lmdb { path, max_size_mb } => {
                tracing::info!(path = %path.display(), max_size_mb, "Opening LMDB cache");
                Arc::new(LmdbKeyValueCache::new(path, *max_size_mb).map_err(RmiError::from)?)
            }
        };
        tracing::warn!("No durable store driver configured, using the in-memory store");
        let store: Arc<dyn DurableStore> = Arc::new(InMemoryDurableStore::new());

        Ok(Self::new(cache, store, settings.engine.clone(), notifier)?)
    }

    /// A sync worker draining this context's queues.
    pub fn sync_worker(&self, worker: WorkerConfig, degraded: DegradedMode) -> SyncWorker {
        SyncWorker::new(
            self.queue.clone(),
            self.store.clone(),
            self.cache.clone(),
            self.config.clone(),
            worker,
            degraded,
        )
    }

    pub fn health_probe(&self, memory_threshold: f64) -> BackendHealthProbe {
        BackendHealthProbe::new(
            self.store.clone(),
            self.cache.clone(),
            memory_threshold,
            self.config.backend_timeout,
        )
    }

    pub async fn read_composite(&self, cpf: &CitizenId) -> RmiResult<Citizen> {
        self.composite.read_composite(cpf).await
    }

    /// Validate and write one sub-field. A phone starts a verification
    /// instead of being written.
    pub async fn update_sub_field(
        &self,
        cpf: &CitizenId,
        input: &SubFieldInput,
    ) -> RmiResult<SubFieldUpdate> {
        match input {
            SubFieldInput::Phone(phone) => self
                .begin_phone_verification(cpf, phone)
                .await
                .map(SubFieldUpdate::VerificationPending),
            other => {
                self.writes.declare(cpf, other).await?;
                Ok(SubFieldUpdate::Written)
            }
        }
    }

    pub async fn begin_phone_verification(
        &self,
        cpf: &CitizenId,
        input: &PhoneInput,
    ) -> RmiResult<PendingVerification> {
        self.verification.begin_phone_verification(cpf, input).await
    }

    pub async fn complete_phone_verification(
        &self,
        cpf: &CitizenId,
        code: &str,
    ) -> RmiResult<VerificationOutcome> {
        self.verification.complete_phone_verification(cpf, code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmi_core::SubFieldKind;
    use rmi_test_utils::assertions::{assert_conflict, assert_validation_error};
    use rmi_test_utils::fixtures;
    use std::time::Duration;

    fn context() -> EngineContext {
        let store = InMemoryDurableStore::new();
        store.seed("citizens", fixtures::citizen_doc(&fixtures::cpf()));
        EngineContext::new(
            Arc::new(InMemoryKeyValueCache::new()),
            Arc::new(store),
            fixtures::fast_config(),
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_update_sub_field_rejects_repeated_email() {
        let ctx = context();
        let cpf = fixtures::cpf();
        let email = SubFieldInput::Email(fixtures::email_input());

        let first = ctx.update_sub_field(&cpf, &email).await.unwrap();
        assert_eq!(first, SubFieldUpdate::Written);
        let merged = ctx.read_composite(&cpf).await.unwrap();
        let valor = merged.email.and_then(|e| e.principal).and_then(|p| p.valor);
        assert_eq!(valor, Some(fixtures::email_input().valor));

        let again = ctx.update_sub_field(&cpf, &email).await;
        assert_conflict(&again, SubFieldKind::Email);
    }

    #[tokio::test]
    async fn test_update_sub_field_validates_input() {
        let ctx = context();
        let cpf = fixtures::cpf();
        let result = ctx
            .update_sub_field(&cpf, &SubFieldInput::Ethnicity("not-a-race".to_string()))
            .await;
        assert_validation_error(&result);

        let merged = ctx.read_composite(&cpf).await.unwrap();
        assert_eq!(merged.raca.as_deref(), Some("branca"));
    }

    #[tokio::test]
    async fn test_update_sub_field_phone_waits_for_verification() {
        let ctx = context();
        let cpf = fixtures::cpf();
        let phone = fixtures::phone_input();

        let update = ctx
            .update_sub_field(&cpf, &SubFieldInput::Phone(phone.clone()))
            .await
            .unwrap();
        match update {
            SubFieldUpdate::VerificationPending(pending) => {
                assert_eq!(pending.phone_number, phone.full_number())
            }
            other => panic!("Expected a pending verification, got {:?}", other),
        }

        let merged = ctx.read_composite(&cpf).await.unwrap();
        let telefone = merged.telefone.and_then(|t| t.principal).and_then(|p| p.valor);
        assert_eq!(telefone.as_deref(), Some("911111111"));
    }

    #[tokio::test]
    async fn test_declare_refuses_phone() {
        let ctx = context();
        let result = ctx
            .writes
            .declare(&fixtures::cpf(), &SubFieldInput::Phone(fixtures::phone_input()))
            .await;
        assert_validation_error(&result);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EngineConfig::default().with_backend_timeout(Duration::ZERO);
        let result = EngineContext::new(
            Arc::new(InMemoryKeyValueCache::new()),
            Arc::new(InMemoryDurableStore::new()),
            config,
            None,
        );
        assert!(matches!(result, Err(RmiError::Config(_))));
    }

    #[tokio::test]
    async fn test_from_settings_with_lmdb_cache() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EngineSettings {
            engine: fixtures::fast_config(),
            cache_backend: CacheBackend::Lmdb {
                path: dir.path().join("cache"),
                max_size_mb: 16,
            },
        };
        let ctx = EngineContext::from_settings(&settings, None).unwrap();

        let cpf = fixtures::cpf();
        ctx.writes.update_ethnicity(&cpf, "amarela").await.unwrap();
        let merged = ctx.read_composite(&cpf).await.unwrap();
        assert_eq!(merged.raca.as_deref(), Some("amarela"));
    }

    #[tokio::test]
    async fn test_disabled_composite_cache_is_never_filled() {
        let store = InMemoryDurableStore::new();
        store.seed("citizens", fixtures::citizen_doc(&fixtures::cpf()));
        let config = fixtures::fast_config().with_composite_cache(false);
        let ctx = EngineContext::new(
            Arc::new(InMemoryKeyValueCache::new()),
            Arc::new(store),
            config,
            None,
        )
        .unwrap();

        ctx.read_composite(&fixtures::cpf()).await.unwrap();
        assert!(!ctx.composite.is_cached(&fixtures::cpf()).await.unwrap());
    }
}
