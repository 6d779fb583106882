//! Sync Worker Background Task
//!
//! Drains the durable-persistence queues into the durable store. Each poll
//! walks the configured queue types round-robin and handles at most
//! `jobs_per_cycle` jobs, so a backlog on one type cannot starve the rest.
//!
//! A successful job is upserted by citizen id. Unless a newer write is
//! still buffered, its data is copied into the read cache and the write
//! buffer entry it came from is dropped. A failed
//! job is re-enqueued after a linear backoff until it runs out of retries,
//! then moved to the dead-letter queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rmi_core::{CitizenId, EngineConfig, EntityKind, SyncJob, SyncResult};
use rmi_storage::{with_deadline, CacheKey, DurableStore, Filter, KeyValueCache, SyncQueue};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::WorkerConfig;
use crate::jobs::degraded_mode::DegradedMode;
use crate::telemetry::with_metrics;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for worker activity since startup.
#[derive(Debug, Default)]
pub struct SyncWorkerMetrics {
    pub jobs_processed: AtomicU64,
    pub jobs_succeeded: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_requeued: AtomicU64,
    pub jobs_dead_lettered: AtomicU64,
    pub cycles: AtomicU64,
    /// Polls skipped because degraded mode was on
    pub skipped_cycles: AtomicU64,
}

impl SyncWorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SyncWorkerSnapshot {
        SyncWorkerSnapshot {
            jobs_processed: self.jobs_processed.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_requeued: self.jobs_requeued.load(Ordering::Relaxed),
            jobs_dead_lettered: self.jobs_dead_lettered.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            skipped_cycles: self.skipped_cycles.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncWorkerSnapshot {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_requeued: u64,
    pub jobs_dead_lettered: u64,
    pub cycles: u64,
    pub skipped_cycles: u64,
}

// ============================================================================
// WORKER
// ============================================================================

#[derive(Clone)]
pub struct SyncWorker {
    queue: SyncQueue,
    store: Arc<dyn DurableStore>,
    cache: Arc<dyn KeyValueCache>,
    config: EngineConfig,
    worker: WorkerConfig,
    degraded: DegradedMode,
    metrics: Arc<SyncWorkerMetrics>,
}

impl SyncWorker {
    pub fn new(
        queue: SyncQueue,
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn KeyValueCache>,
        config: EngineConfig,
        worker: WorkerConfig,
        degraded: DegradedMode,
    ) -> Self {
        Self {
            queue,
            store,
            cache,
            config,
            worker,
            degraded,
            metrics: Arc::new(SyncWorkerMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<SyncWorkerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Poll until the shutdown signal is received.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Arc<SyncWorkerMetrics> {
        let mut ticker = interval(self.worker.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            poll_interval_ms = self.worker.poll_interval.as_millis() as u64,
            jobs_per_cycle = self.worker.jobs_per_cycle,
            queues = self.worker.job_types.len(),
            "Sync worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Sync worker shutting down");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            jobs_processed = snapshot.jobs_processed,
            jobs_succeeded = snapshot.jobs_succeeded,
            jobs_failed = snapshot.jobs_failed,
            jobs_dead_lettered = snapshot.jobs_dead_lettered,
            cycles = snapshot.cycles,
            "Sync worker completed"
        );
        self.metrics
    }

    /// One poll: up to `jobs_per_cycle` jobs, taking from the queues in turn.
    pub async fn run_cycle(&self) -> Vec<SyncResult> {
        if self.degraded.is_active().await {
            self.metrics.skipped_cycles.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Degraded mode active, skipping sync cycle");
            return Vec::new();
        }
        self.metrics.cycles.fetch_add(1, Ordering::Relaxed);

        let mut results = Vec::new();
        let mut exhausted = vec![false; self.worker.job_types.len()];
        while results.len() < self.worker.jobs_per_cycle && exhausted.contains(&false) {
            for (idx, job_type) in self.worker.job_types.iter().enumerate() {
                if exhausted[idx] || results.len() >= self.worker.jobs_per_cycle {
                    continue;
                }
                match self.queue.dequeue(job_type).await {
                    Ok(Some(job)) => results.push(self.process_job(job).await),
                    Ok(None) => exhausted[idx] = true,
                    Err(e) => {
                        tracing::error!(job_type = %job_type, error = %e, "Failed to dequeue sync job");
                        exhausted[idx] = true;
                    }
                }
            }
        }

        if !results.is_empty() {
            tracing::debug!(jobs = results.len(), "Sync cycle completed");
        }
        results
    }

    /// Persist one job and settle it: cache refresh on success, requeue or
    /// dead-letter on failure.
    pub async fn process_job(&self, mut job: SyncJob) -> SyncResult {
        let started = Instant::now();
        self.metrics.jobs_processed.fetch_add(1, Ordering::Relaxed);

        let outcome = with_deadline(
            self.config.backend_timeout,
            "store.upsert",
            self.store
                .upsert(&job.collection, &Filter::by_cpf(job.key.as_str()), job.data.clone()),
        )
        .await;
        let duration = started.elapsed();
        with_metrics(|m| m.record_sync(&job.job_type, outcome.is_ok(), duration.as_secs_f64()));

        match outcome {
            Ok(()) => {
                self.metrics.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
                self.refresh_caches(&job).await;
                tracing::debug!(job_id = %job.id, job_type = %job.job_type, key = %job.key, "Sync job persisted");
                SyncResult {
                    job_id: job.id,
                    success: true,
                    error: None,
                    synced_at: Utc::now(),
                    duration,
                }
            }
            Err(e) => {
                self.metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
                let error = e.to_string();
                let job_id = job.id;
                if job.record_failure() {
                    self.dead_letter(job, &error).await;
                } else {
                    self.requeue_later(job, &error);
                }
                SyncResult {
                    job_id,
                    success: false,
                    error: Some(error),
                    synced_at: Utc::now(),
                    duration,
                }
            }
        }
    }

    async fn refresh_caches(&self, job: &SyncJob) {
        let (Some(entity), Ok(cpf)) = (
            EntityKind::from_type_name(&job.job_type),
            CitizenId::parse(&job.key),
        ) else {
            tracing::warn!(job_type = %job.job_type, key = %job.key, "No cache keys for sync job");
            return;
        };

        // A newer write may still be queued behind this job; its buffer entry
        // must survive until that job lands.
        let buffer_key = CacheKey::write_buffer(entity, &cpf).encode();
        let buffered = match with_deadline(
            self.config.backend_timeout,
            "cache.get",
            self.cache.get(&buffer_key),
        )
        .await
        {
            Ok(buffered) => buffered,
            Err(e) => {
                tracing::warn!(key = %buffer_key, error = %e, "Failed to read write buffer, leaving caches alone");
                return;
            }
        };
        if let Some(raw) = &buffered {
            if !is_superseded_by(raw, &job.data) {
                tracing::debug!(key = %buffer_key, job_id = %job.id, "Newer write buffered, keeping it");
                return;
            }
        }

        let read_key = CacheKey::read_cache(entity, &cpf).encode();
        match serde_json::to_string(&job.data) {
            Ok(raw) => {
                if let Err(e) = with_deadline(
                    self.config.backend_timeout,
                    "cache.set",
                    self.cache.set(&read_key, &raw, self.config.read_cache_ttl),
                )
                .await
                {
                    tracing::error!(key = %read_key, error = %e, "Failed to refresh read cache");
                }
            }
            Err(e) => tracing::error!(key = %read_key, error = %e, "Failed to encode job data"),
        }

        if buffered.is_none() {
            return;
        }
        if let Err(e) = with_deadline(
            self.config.backend_timeout,
            "cache.del",
            self.cache.del(&buffer_key),
        )
        .await
        {
            tracing::warn!(key = %buffer_key, error = %e, "Failed to drop write buffer entry");
        }
    }

    async fn dead_letter(&self, job: SyncJob, error: &str) {
        let (job_id, job_type, retries) = (job.id, job.job_type.clone(), job.retry_count);
        match self.queue.dead_letter(job, error).await {
            Ok(_) => {
                self.metrics.jobs_dead_lettered.fetch_add(1, Ordering::Relaxed);
                with_metrics(|m| m.record_dead_letter(&job_type));
                tracing::error!(job_id = %job_id, job_type = %job_type, retries, error, "Sync job moved to dead-letter queue");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, job_type = %job_type, error = %e, "Failed to dead-letter sync job; it is lost");
            }
        }
    }

    /// Re-enqueue after the job's backoff without holding up the poll.
    fn requeue_later(&self, job: SyncJob, error: &str) {
        let delay = job.backoff(self.worker.backoff_step, self.worker.max_backoff);
        tracing::warn!(
            job_id = %job.id,
            job_type = %job.job_type,
            retry_count = job.retry_count,
            max_retries = job.max_retries,
            delay_ms = delay.as_millis() as u64,
            error,
            "Sync job failed, retrying"
        );
        self.metrics.jobs_requeued.fetch_add(1, Ordering::Relaxed);

        let queue = self.queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.enqueue(&job).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to requeue sync job");
            }
        });
    }
}

/// Whether the buffered payload is the job's own data or older than it.
///
/// Unreadable buffer entries count as superseded; a payload without
/// `updated_at` never outranks one that has it.
fn is_superseded_by(buffered: &str, persisted: &Value) -> bool {
    let Ok(buffered) = serde_json::from_str::<Value>(buffered) else {
        return true;
    };
    if &buffered == persisted {
        return true;
    }
    match (updated_at_of(&buffered), updated_at_of(persisted)) {
        (Some(buffered_at), Some(persisted_at)) => buffered_at < persisted_at,
        (None, _) => true,
        (Some(_), None) => false,
    }
}

fn updated_at_of(payload: &Value) -> Option<DateTime<Utc>> {
    payload
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc))
}
