//! Background Jobs
//!
//! - `sync_worker`: drains the durable-persistence queues into the store
//! - `degraded_mode`: pauses the worker while a backend is unhealthy
//!
//! # Usage
//!
//! ```ignore
//! use rmi_engine::jobs::{run_degraded_monitor, DegradedMode, SyncWorker};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let degraded = DegradedMode::new();
//! tokio::spawn(run_degraded_monitor(degraded.clone(), probe, interval, shutdown_rx.clone()));
//! tokio::spawn(worker.run(shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod degraded_mode;
pub mod sync_worker;

pub use degraded_mode::{
    run_degraded_monitor, BackendHealthProbe, DegradedMode, DegradedState, HealthProbe,
};
pub use sync_worker::{SyncWorker, SyncWorkerMetrics, SyncWorkerSnapshot};
