//! RMI Engine - Self-Declared Data Services and Sync Worker
//!
//! Wires the storage seams from `rmi-storage` into the services callers use:
//! cache-first writes of self-declared sub-fields, the merged composite
//! citizen view, phone verification, and the background worker that drains
//! the durable-persistence queues.

pub mod config;
pub mod constants;
pub mod error;
pub mod jobs;
pub mod services;
pub mod state;
pub mod telemetry;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{CacheBackend, EngineSettings, WorkerConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use jobs::{
    run_degraded_monitor, BackendHealthProbe, DegradedMode, HealthProbe, SyncWorker,
    SyncWorkerMetrics,
};
pub use services::{
    CacheService, CodeNotifier, CompositeCache, CompositeService, ConflictPolicy,
    PendingVerification, PhoneVerificationService,
};
pub use state::{EngineContext, SubFieldUpdate};
