//! Constants for the RMI Engine
//!
//! Defaults for the sync worker, the degraded-mode monitor and telemetry.
//! Cache TTLs and store deadlines live in `rmi_core::config`.

// ============================================================================
// SYNC WORKER
// ============================================================================

/// How often the worker polls the queues (milliseconds)
pub const DEFAULT_WORKER_POLL_INTERVAL_MS: u64 = 50;

/// Maximum jobs processed per poll
pub const DEFAULT_WORKER_JOBS_PER_CYCLE: usize = 3;

/// Backoff added per failed attempt before a job is re-enqueued (seconds)
pub const DEFAULT_WORKER_BACKOFF_STEP_SECS: u64 = 5;

/// Upper bound on the re-enqueue backoff (seconds)
pub const DEFAULT_WORKER_MAX_BACKOFF_SECS: u64 = 60;

/// Queue type for whole citizen documents
pub const CITIZEN_JOB_TYPE: &str = "citizen";

// ============================================================================
// DEGRADED MODE
// ============================================================================

/// How often degraded-mode conditions are checked (seconds)
pub const DEFAULT_DEGRADED_CHECK_INTERVAL_SECS: u64 = 10;

/// Cache memory ratio at or above which the engine degrades
pub const DEFAULT_MEMORY_THRESHOLD: f64 = 0.85;

/// Reason recorded when the durable store does not answer a ping
pub const REASON_STORE_DOWN: &str = "durable_store_down";

/// Reason recorded when cache memory crosses the threshold
pub const REASON_CACHE_MEMORY_HIGH: &str = "cache_memory_high";

// ============================================================================
// TELEMETRY
// ============================================================================

/// Default service name reported in logs
pub const DEFAULT_SERVICE_NAME: &str = "rmi-sync-worker";

/// Default tracing filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "rmi_engine=debug,rmi_storage=debug,info";

/// Default LMDB map size for the cache backend (megabytes)
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 1024;
