//! Engine Configuration Module
//!
//! Loads the engine and worker settings from `RMI_*` environment variables
//! with defaults suitable for development.

use std::path::PathBuf;
use std::time::Duration;

use rmi_core::{EngineConfig, RmiResult};

use crate::constants::{
    CITIZEN_JOB_TYPE, DEFAULT_DEGRADED_CHECK_INTERVAL_SECS, DEFAULT_LMDB_MAX_SIZE_MB,
    DEFAULT_MEMORY_THRESHOLD, DEFAULT_WORKER_BACKOFF_STEP_SECS, DEFAULT_WORKER_JOBS_PER_CYCLE,
    DEFAULT_WORKER_MAX_BACKOFF_SECS, DEFAULT_WORKER_POLL_INTERVAL_MS,
};

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| match s.to_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => default,
        })
        .unwrap_or(default)
}

// ============================================================================
// ENGINE SETTINGS
// ============================================================================

/// Which key-value cache backend the binary wires in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Lmdb { path: PathBuf, max_size_mb: usize },
}

/// Everything needed to build an [`EngineContext`](crate::EngineContext).
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub engine: EngineConfig,
    pub cache_backend: CacheBackend,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            cache_backend: CacheBackend::Memory,
        }
    }
}

impl EngineSettings {
    /// Create EngineSettings from environment variables.
    ///
    /// Environment variables:
    /// - `RMI_WRITE_BUFFER_TTL_SECS` (default: 21600)
    /// - `RMI_READ_CACHE_TTL_SECS` (default: 10800)
    /// - `RMI_COMPOSITE_TTL_SECS` (default: 3600)
    /// - `RMI_COMPOSITE_CACHE_ENABLED`: "true" or "false" (default: true)
    /// - `RMI_OUTDATED_THRESHOLD_DAYS` (default: 180)
    /// - `RMI_VERIFICATION_TTL_SECS` (default: 300)
    /// - `RMI_BACKEND_TIMEOUT_MS` (default: 5000)
    /// - `RMI_JOB_MAX_RETRIES` (default: 3)
    /// - `RMI_CITIZEN_COLLECTION`, `RMI_SELF_DECLARED_COLLECTION`,
    ///   `RMI_PHONE_VERIFICATION_COLLECTION`
    /// - `RMI_LMDB_PATH`: enables the LMDB cache backend when set
    /// - `RMI_LMDB_MAX_SIZE_MB` (default: 1024)
    ///
    /// The result is validated before it is returned.
    pub fn from_env() -> RmiResult<Self> {
        let mut engine = EngineConfig::default();

        if let Some(ttl) = env_secs("RMI_WRITE_BUFFER_TTL_SECS") {
            engine = engine.with_write_buffer_ttl(ttl);
        }
        if let Some(ttl) = env_secs("RMI_READ_CACHE_TTL_SECS") {
            engine = engine.with_read_cache_ttl(ttl);
        }
        if let Some(ttl) = env_secs("RMI_COMPOSITE_TTL_SECS") {
            engine = engine.with_composite_ttl(ttl);
        }
        engine = engine.with_composite_cache(env_flag("RMI_COMPOSITE_CACHE_ENABLED", true));
        if let Some(days) = env_parse::<u64>("RMI_OUTDATED_THRESHOLD_DAYS") {
            engine = engine.with_outdated_threshold(Duration::from_secs(days * 24 * 3600));
        }
        if let Some(ttl) = env_secs("RMI_VERIFICATION_TTL_SECS") {
            engine = engine.with_verification_ttl(ttl);
        }
        if let Some(ms) = env_parse::<u64>("RMI_BACKEND_TIMEOUT_MS") {
            engine = engine.with_backend_timeout(Duration::from_millis(ms));
        }
        if let Some(retries) = env_parse::<u32>("RMI_JOB_MAX_RETRIES") {
            engine = engine.with_job_max_retries(retries);
        }
        if let Ok(name) = std::env::var("RMI_CITIZEN_COLLECTION") {
            engine.collections.citizens = name;
        }
        if let Ok(name) = std::env::var("RMI_SELF_DECLARED_COLLECTION") {
            engine.collections.self_declared = name;
        }
        if let Ok(name) = std::env::var("RMI_PHONE_VERIFICATION_COLLECTION") {
            engine.collections.phone_verifications = name;
        }
        engine.validate()?;

        let cache_backend = match std::env::var("RMI_LMDB_PATH") {
            Ok(path) if !path.trim().is_empty() => CacheBackend::Lmdb {
                path: PathBuf::from(path),
                max_size_mb: env_parse("RMI_LMDB_MAX_SIZE_MB").unwrap_or(DEFAULT_LMDB_MAX_SIZE_MB),
            },
            _ => CacheBackend::Memory,
        };

        Ok(Self {
            engine,
            cache_backend,
        })
    }
}

// ============================================================================
// WORKER CONFIGURATION
// ============================================================================

/// Configuration for the sync worker and the degraded-mode monitor.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often the queues are polled (default: 50ms)
    pub poll_interval: Duration,

    /// Maximum jobs handled per poll (default: 3)
    pub jobs_per_cycle: usize,

    /// Backoff per failed attempt (default: 5s)
    pub backoff_step: Duration,

    /// Backoff ceiling (default: 60s)
    pub max_backoff: Duration,

    /// How often degraded-mode conditions are checked (default: 10s)
    pub degraded_check_interval: Duration,

    /// Cache memory ratio that triggers degraded mode (default: 0.85)
    pub memory_threshold: f64,

    /// Queue types drained, in round-robin order
    pub job_types: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_WORKER_POLL_INTERVAL_MS),
            jobs_per_cycle: DEFAULT_WORKER_JOBS_PER_CYCLE,
            backoff_step: Duration::from_secs(DEFAULT_WORKER_BACKOFF_STEP_SECS),
            max_backoff: Duration::from_secs(DEFAULT_WORKER_MAX_BACKOFF_SECS),
            degraded_check_interval: Duration::from_secs(DEFAULT_DEGRADED_CHECK_INTERVAL_SECS),
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            job_types: default_job_types(),
        }
    }
}

/// Every self-declared sub-field queue plus the citizen queue.
pub fn default_job_types() -> Vec<String> {
    rmi_core::SubFieldKind::ALL
        .iter()
        .map(|kind| kind.type_name().to_string())
        .chain(std::iter::once(CITIZEN_JOB_TYPE.to_string()))
        .collect()
}

impl WorkerConfig {
    /// Create WorkerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `RMI_WORKER_POLL_INTERVAL_MS` (default: 50)
    /// - `RMI_WORKER_JOBS_PER_CYCLE` (default: 3)
    /// - `RMI_WORKER_BACKOFF_STEP_SECS` (default: 5)
    /// - `RMI_WORKER_MAX_BACKOFF_SECS` (default: 60)
    /// - `RMI_DEGRADED_CHECK_INTERVAL_SECS` (default: 10)
    /// - `RMI_DEGRADED_MEMORY_THRESHOLD` (default: 0.85)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: env_parse("RMI_WORKER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            jobs_per_cycle: env_parse("RMI_WORKER_JOBS_PER_CYCLE")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.jobs_per_cycle),
            backoff_step: env_secs("RMI_WORKER_BACKOFF_STEP_SECS").unwrap_or(defaults.backoff_step),
            max_backoff: env_secs("RMI_WORKER_MAX_BACKOFF_SECS").unwrap_or(defaults.max_backoff),
            degraded_check_interval: env_secs("RMI_DEGRADED_CHECK_INTERVAL_SECS")
                .unwrap_or(defaults.degraded_check_interval),
            memory_threshold: env_parse("RMI_DEGRADED_MEMORY_THRESHOLD")
                .filter(|t: &f64| *t > 0.0 && *t <= 1.0)
                .unwrap_or(defaults.memory_threshold),
            job_types: defaults.job_types,
        }
    }
}
