//! Durable-persistence queue on top of the key-value cache lists.
//!
//! Producers `LPUSH` onto `sync:queue:<type>`, the worker `RPOP`s, so each
//! queue is FIFO. Jobs that run out of retries land on `sync:dlq:<type>`.

use std::sync::Arc;
use std::time::Duration;

use rmi_core::{DlqJob, RmiError, RmiResult, SyncJob};
use tracing::{debug, error};

use crate::cache::{CacheKey, KeyValueCache};
use crate::deadline::with_deadline;

#[derive(Clone)]
pub struct SyncQueue {
    cache: Arc<dyn KeyValueCache>,
    deadline: Duration,
}

impl SyncQueue {
    pub fn new(cache: Arc<dyn KeyValueCache>, deadline: Duration) -> Self {
        Self { cache, deadline }
    }

    /// Append a job to its type's queue. Returns the queue length.
    pub async fn enqueue(&self, job: &SyncJob) -> RmiResult<u64> {
        let key = CacheKey::sync_queue(&job.job_type).encode();
        let raw = serde_json::to_string(job).map_err(|e| RmiError::serialization("sync_job", e))?;
        let depth = with_deadline(self.deadline, "cache.lpush", self.cache.lpush(&key, &raw)).await?;
        debug!(job_id = %job.id, queue = %key, depth, "sync job queued");
        Ok(depth)
    }

    /// Take the oldest job of a type without blocking.
    ///
    /// An entry that does not decode is dropped and reported as an error so
    /// it cannot wedge the queue.
    pub async fn dequeue(&self, job_type: &str) -> RmiResult<Option<SyncJob>> {
        let key = CacheKey::sync_queue(job_type).encode();
        let Some(raw) = with_deadline(self.deadline, "cache.rpop", self.cache.rpop(&key)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw).map(Some).map_err(|e| {
            error!(queue = %key, error = %e, "dropping undecodable sync job");
            RmiError::serialization("sync_job", e)
        })
    }

    /// Move a job to its type's dead-letter queue.
    pub async fn dead_letter(&self, job: SyncJob, reason: impl Into<String>) -> RmiResult<u64> {
        let key = CacheKey::dead_letter(&job.job_type).encode();
        let entry = DlqJob::new(job, reason);
        let raw = serde_json::to_string(&entry).map_err(|e| RmiError::serialization("dlq_job", e))?;
        with_deadline(self.deadline, "cache.lpush", self.cache.lpush(&key, &raw)).await
    }

    /// Pending jobs of a type.
    pub async fn depth(&self, job_type: &str) -> RmiResult<u64> {
        let key = CacheKey::sync_queue(job_type).encode();
        with_deadline(self.deadline, "cache.llen", self.cache.llen(&key)).await
    }

    /// Dead-lettered jobs of a type.
    pub async fn dlq_depth(&self, job_type: &str) -> RmiResult<u64> {
        let key = CacheKey::dead_letter(job_type).encode();
        with_deadline(self.deadline, "cache.llen", self.cache.llen(&key)).await
    }

    /// Oldest dead-lettered entry, for inspection and manual replay.
    pub async fn pop_dead_letter(&self, job_type: &str) -> RmiResult<Option<DlqJob>> {
        let key = CacheKey::dead_letter(job_type).encode();
        let Some(raw) = with_deadline(self.deadline, "cache.rpop", self.cache.rpop(&key)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| RmiError::serialization("dlq_job", e))
    }
}
