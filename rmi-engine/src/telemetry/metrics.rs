//! Prometheus Metrics Definitions
//!
//! Defines all RMI engine metrics with appropriate labels and types.
//! `render_metrics` produces the text exposition for a scrape endpoint.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, register_int_gauge_vec,
    CounterVec, Encoder, Gauge, HistogramVec, IntGaugeVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// Sync job latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s
const SYNC_LATENCY_BUCKETS: &[f64] =
    &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<EngineMetrics>> = Lazy::new(EngineMetrics::new);

/// Container for all engine metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    /// Sync attempts - labels: type, status
    pub sync_operations_total: CounterVec,

    /// Sync attempt duration - labels: type
    pub sync_duration_seconds: HistogramVec,

    /// Jobs moved to a dead-letter queue - labels: type
    pub dead_letter_total: CounterVec,

    /// Pending jobs per queue - labels: type
    pub queue_depth: IntGaugeVec,

    /// 1 while degraded mode is active
    pub degraded_mode: Gauge,

    /// Self-declared reads answered per tier - labels: tier
    pub tier_hits_total: CounterVec,

    /// Self-declared writes - labels: field, status
    pub self_declared_updates_total: CounterVec,
}

impl EngineMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            sync_operations_total: register_counter_vec!(
                "rmi_sync_operations_total",
                "Total number of durable sync attempts",
                &["type", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register sync_operations_total: {}", e)))?,

            sync_duration_seconds: register_histogram_vec!(
                "rmi_sync_duration_seconds",
                "Durable sync attempt duration in seconds",
                &["type"],
                SYNC_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register sync_duration_seconds: {}", e)))?,

            dead_letter_total: register_counter_vec!(
                "rmi_dead_letter_total",
                "Total jobs moved to a dead-letter queue",
                &["type"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register dead_letter_total: {}", e)))?,

            queue_depth: register_int_gauge_vec!(
                "rmi_queue_depth",
                "Pending jobs per sync queue",
                &["type"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register queue_depth: {}", e)))?,

            degraded_mode: register_gauge!(
                "rmi_degraded_mode",
                "Whether degraded mode is active (1) or not (0)"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register degraded_mode: {}", e)))?,

            tier_hits_total: register_counter_vec!(
                "rmi_tier_hits_total",
                "Self-declared values served per storage tier",
                &["tier"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register tier_hits_total: {}", e)))?,

            self_declared_updates_total: register_counter_vec!(
                "rmi_self_declared_updates_total",
                "Total self-declared sub-field writes",
                &["field", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register self_declared_updates_total: {}", e)))?,
        })
    }

    /// Record one sync attempt.
    pub fn record_sync(&self, job_type: &str, success: bool, duration_secs: f64) {
        let status = if success { "success" } else { "error" };
        self.sync_operations_total
            .with_label_values(&[job_type, status])
            .inc();
        self.sync_duration_seconds
            .with_label_values(&[job_type])
            .observe(duration_secs);
    }

    pub fn record_dead_letter(&self, job_type: &str) {
        self.dead_letter_total.with_label_values(&[job_type]).inc();
    }

    pub fn set_queue_depth(&self, job_type: &str, depth: u64) {
        self.queue_depth
            .with_label_values(&[job_type])
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    pub fn set_degraded(&self, active: bool) {
        self.degraded_mode.set(if active { 1.0 } else { 0.0 });
    }

    pub fn record_tier_hit(&self, tier: &str, count: usize) {
        self.tier_hits_total
            .with_label_values(&[tier])
            .inc_by(count as f64);
    }

    pub fn record_update(&self, field: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.self_declared_updates_total
            .with_label_values(&[field, status])
            .inc();
    }
}

/// Run `f` against the global metrics when they registered successfully.
pub fn with_metrics(f: impl FnOnce(&EngineMetrics)) {
    if let Ok(metrics) = METRICS.as_ref() {
        f(metrics);
    }
}

/// Prometheus text exposition of every registered metric.
pub fn render_metrics() -> ApiResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ApiError::internal_error(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ApiError::internal_error(format!("Metrics are not UTF-8: {}", e)))
}
