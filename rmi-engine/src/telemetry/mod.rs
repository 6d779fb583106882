//! RMI Telemetry - Observability Infrastructure
//!
//! Provides structured logging setup and Prometheus metrics for the engine
//! and the sync worker.

pub mod metrics;
pub mod tracer;

pub use metrics::{render_metrics, with_metrics, EngineMetrics, METRICS};
pub use tracer::{init_tracing, LogFormat, TelemetryConfig};
