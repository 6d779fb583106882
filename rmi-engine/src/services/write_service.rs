//! Cache-first writes of self-declared sub-fields.
//!
//! A write lands in the write buffer first and is only then handed to the
//! durable-persistence queue. The buffer write is the commit point: once it
//! succeeds the citizen reads their own value back, whatever happens to the
//! queue or the composite cache afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rmi_core::{
    validate_address, validate_display_name, validate_email, validate_ethnicity, AddressInput,
    CitizenId, EmailInput, EngineConfig, PhoneInput, RmiError, RmiResult, SubFieldInput,
    SubFieldKind, SubFieldRecord, SubFieldValue, SyncJob, ValidationError,
};
use rmi_storage::{with_deadline, CacheKey, CacheStats, DataManager, KeyValueCache, SyncQueue};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::default_job_types;
use crate::services::composite_service::CompositeCache;
use crate::services::conflict::ConflictPolicy;
use crate::telemetry::with_metrics;

/// Pending and dead-lettered jobs of one queue type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub pending: u64,
    pub dead_lettered: u64,
}

/// Snapshot of the cache and its sync queues.
#[derive(Debug, Clone, Serialize)]
pub struct WriteCacheStats {
    pub queues: BTreeMap<String, QueueDepth>,
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
}

#[derive(Clone)]
pub struct CacheService {
    cache: Arc<dyn KeyValueCache>,
    data: DataManager,
    queue: SyncQueue,
    composite: CompositeCache,
    conflicts: ConflictPolicy,
    config: EngineConfig,
}

impl CacheService {
    pub fn new(
        cache: Arc<dyn KeyValueCache>,
        data: DataManager,
        queue: SyncQueue,
        composite: CompositeCache,
    ) -> Self {
        let config = data.config().clone();
        Self {
            cache,
            data,
            queue,
            composite,
            conflicts: ConflictPolicy::new(config.outdated_threshold),
            config,
        }
    }

    /// Write one sub-field: buffer, enqueue, invalidate.
    ///
    /// Only the buffer write can fail the call. Enqueue and invalidation
    /// failures are logged; the buffered value still expires on its own.
    /// Callers outside the crate go through [`CacheService::declare`].
    pub(crate) async fn update_sub_field(&self, cpf: &CitizenId, value: SubFieldValue) -> RmiResult<()> {
        let kind = value.kind();
        let result = self.write_through(cpf, value).await;
        with_metrics(|m| m.record_update(kind.type_name(), result.is_ok()));
        result
    }

    async fn write_through(&self, cpf: &CitizenId, value: SubFieldValue) -> RmiResult<()> {
        let kind = value.kind();
        let payload = SubFieldRecord::new(cpf.clone(), value, Utc::now()).to_payload()?;
        let raw = serde_json::to_string(&payload)
            .map_err(|e| RmiError::serialization(kind.type_name(), e))?;

        let key = CacheKey::write_buffer(kind, cpf).encode();
        with_deadline(
            self.config.backend_timeout,
            "cache.set",
            self.cache.set(&key, &raw, self.config.write_buffer_ttl),
        )
        .await?;
        debug!(cpf = %cpf, key = %key, "self-declared value buffered");

        let job = SyncJob::new(
            kind.type_name(),
            cpf.as_str(),
            self.config.collections.self_declared.as_str(),
            payload,
        )
        .with_max_retries(self.config.job_max_retries);
        if let Err(e) = self.queue.enqueue(&job).await {
            warn!(cpf = %cpf, job_type = %kind, error = %e, "failed to queue sync job");
        }

        if let Err(e) = self.composite.invalidate(cpf).await {
            warn!(cpf = %cpf, error = %e, "failed to invalidate composite view");
        }
        Ok(())
    }

    /// Route a submitted value through its validating wrapper.
    ///
    /// Phones are refused here: a phone only becomes self-declared once its
    /// verification completes.
    pub async fn declare(&self, cpf: &CitizenId, input: &SubFieldInput) -> RmiResult<()> {
        match input {
            SubFieldInput::Address(address) => self.update_address(cpf, address).await,
            SubFieldInput::Email(email) => self.update_email(cpf, email).await,
            SubFieldInput::Ethnicity(raca) => self.update_ethnicity(cpf, raca).await,
            SubFieldInput::DisplayName(name) => self.update_display_name(cpf, name).await,
            SubFieldInput::Phone(_) => Err(ValidationError::InvalidValue {
                field: SubFieldKind::Phone.type_name().to_string(),
                reason: "phone numbers are declared through verification".to_string(),
            }
            .into()),
        }
    }

    /// Validate, reject unchanged resubmissions, then write.
    pub async fn update_address(&self, cpf: &CitizenId, input: &AddressInput) -> RmiResult<()> {
        validate_address(input)?;
        let now = Utc::now();
        let value = SubFieldValue::Address(input.to_address(now));
        self.reject_unchanged(cpf, &value).await?;
        self.update_sub_field(cpf, value).await
    }

    pub async fn update_email(&self, cpf: &CitizenId, input: &EmailInput) -> RmiResult<()> {
        validate_email(input)?;
        let value = SubFieldValue::Email(input.to_email(Utc::now()));
        self.reject_unchanged(cpf, &value).await?;
        self.update_sub_field(cpf, value).await
    }

    /// Write a phone the citizen has proven they own.
    ///
    /// Unverified phones never reach the write buffer; they wait in a
    /// pending verification instead.
    pub(crate) async fn update_phone(&self, cpf: &CitizenId, input: &PhoneInput) -> RmiResult<()> {
        let value = SubFieldValue::Phone(input.to_phone(true, Utc::now()));
        self.update_sub_field(cpf, value).await
    }

    pub async fn update_ethnicity(&self, cpf: &CitizenId, raca: &str) -> RmiResult<()> {
        validate_ethnicity(raca)?;
        self.update_sub_field(cpf, SubFieldValue::Ethnicity(raca.to_string()))
            .await
    }

    pub async fn update_display_name(&self, cpf: &CitizenId, name: &str) -> RmiResult<()> {
        validate_display_name(name)?;
        self.update_sub_field(cpf, SubFieldValue::DisplayName(name.to_string()))
            .await
    }

    /// Fail with `Conflict` when `candidate` repeats the current value.
    pub async fn reject_unchanged(&self, cpf: &CitizenId, candidate: &SubFieldValue) -> RmiResult<()> {
        if !ConflictPolicy::applies_to(candidate.kind()) {
            return Ok(());
        }
        let current = self.data.read_sub_field(cpf, candidate.kind()).await?;
        self.conflicts.check(current.as_ref(), candidate, Utc::now())
    }

    /// Queue depths per type plus the backend's own counters.
    pub async fn cache_stats(&self) -> RmiResult<WriteCacheStats> {
        let mut queues = BTreeMap::new();
        for job_type in default_job_types() {
            let depth = QueueDepth {
                pending: self.queue.depth(&job_type).await?,
                dead_lettered: self.queue.dlq_depth(&job_type).await?,
            };
            with_metrics(|m| m.set_queue_depth(&job_type, depth.pending));
            queues.insert(job_type, depth);
        }
        let CacheStats {
            hits,
            misses,
            entry_count,
            ..
        } = with_deadline(self.config.backend_timeout, "cache.stats", self.cache.stats()).await?;
        Ok(WriteCacheStats {
            queues,
            hits,
            misses,
            entry_count,
        })
    }
}
