//! Durable-persistence job types shared by the queue producer and consumer.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{new_job_id, JobId, Timestamp};

/// Retries granted to a job before it is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A unit of "eventually write this document to the durable store".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: JobId,
    /// Queue type, e.g. `self_declared_email`.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Citizen id the document is keyed by.
    pub key: String,
    pub collection: String,
    pub data: Value,
    pub timestamp: Timestamp,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl SyncJob {
    pub fn new(
        job_type: impl Into<String>,
        key: impl Into<String>,
        collection: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            id: new_job_id(),
            job_type: job_type.into(),
            key: key.into(),
            collection: collection.into(),
            data,
            timestamp: Utc::now(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Record one failed attempt. Returns true once the job has used up its
    /// retries and belongs in the dead-letter queue.
    pub fn record_failure(&mut self) -> bool {
        self.retry_count += 1;
        self.retry_count >= self.max_retries
    }

    /// Linear backoff before a retried job is re-enqueued.
    pub fn backoff(&self, step: Duration, max: Duration) -> Duration {
        step.saturating_mul(self.retry_count).min(max)
    }
}

/// A job that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqJob {
    pub original_job: SyncJob,
    pub error: String,
    pub failed_at: Timestamp,
}

impl DlqJob {
    pub fn new(original_job: SyncJob, error: impl Into<String>) -> Self {
        Self {
            original_job,
            error: error.into(),
            failed_at: Utc::now(),
        }
    }
}

/// Outcome of one sync attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub job_id: JobId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub synced_at: Timestamp,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
