//! Degraded Mode
//!
//! When the durable store is unreachable or the cache is close to its
//! memory ceiling, the sync worker stops draining queues so jobs are not
//! burned through their retries against a backend that cannot take them.
//! Reads and cache-first writes keep working; jobs simply wait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rmi_core::Timestamp;
use rmi_storage::{with_deadline, DurableStore, KeyValueCache};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, MissedTickBehavior};

use crate::constants::{REASON_CACHE_MEMORY_HIGH, REASON_STORE_DOWN};
use crate::telemetry::with_metrics;

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DegradedState {
    pub active: bool,
    pub reason: Option<String>,
    pub activated_at: Option<Timestamp>,
}

/// Shared degraded-mode flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct DegradedMode {
    state: Arc<RwLock<DegradedState>>,
}

impl DegradedMode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter degraded mode. A no-op when already active.
    pub async fn activate(&self, reason: &str) {
        let mut state = self.state.write().await;
        if state.active {
            return;
        }
        *state = DegradedState {
            active: true,
            reason: Some(reason.to_string()),
            activated_at: Some(Utc::now()),
        };
        with_metrics(|m| m.set_degraded(true));
        tracing::warn!(reason, "Degraded mode activated");
    }

    /// Leave degraded mode. A no-op when not active.
    pub async fn deactivate(&self) {
        let mut state = self.state.write().await;
        if !state.active {
            return;
        }
        let duration = state
            .activated_at
            .and_then(|at| (Utc::now() - at).to_std().ok())
            .unwrap_or_default();
        let reason = state.reason.take();
        *state = DegradedState::default();
        with_metrics(|m| m.set_degraded(false));
        tracing::info!(
            reason = reason.as_deref().unwrap_or("unknown"),
            duration_secs = duration.as_secs(),
            "Degraded mode deactivated"
        );
    }

    pub async fn is_active(&self) -> bool {
        self.state.read().await.active
    }

    pub async fn reason(&self) -> Option<String> {
        self.state.read().await.reason.clone()
    }

    /// How long degraded mode has been on, if it is.
    pub async fn duration(&self) -> Option<Duration> {
        let state = self.state.read().await;
        let activated_at = state.activated_at.filter(|_| state.active)?;
        Some((Utc::now() - activated_at).to_std().unwrap_or_default())
    }

    pub async fn snapshot(&self) -> DegradedState {
        self.state.read().await.clone()
    }

    /// Probe the backends once and switch mode accordingly.
    pub async fn check_conditions(&self, probe: &dyn HealthProbe) {
        match probe.degraded_reason().await {
            Some(reason) => self.activate(reason).await,
            None => self.deactivate().await,
        }
    }
}

// ============================================================================
// HEALTH PROBE
// ============================================================================

/// Source of the conditions that put the engine into degraded mode.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// The reason to be degraded right now, or `None` when healthy.
    async fn degraded_reason(&self) -> Option<&'static str>;
}

/// Probe that pings the durable store and checks cache memory pressure.
#[derive(Clone)]
pub struct BackendHealthProbe {
    store: Arc<dyn DurableStore>,
    cache: Arc<dyn KeyValueCache>,
    memory_threshold: f64,
    deadline: Duration,
}

impl BackendHealthProbe {
    pub fn new(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn KeyValueCache>,
        memory_threshold: f64,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            memory_threshold,
            deadline,
        }
    }
}

#[async_trait]
impl HealthProbe for BackendHealthProbe {
    async fn degraded_reason(&self) -> Option<&'static str> {
        if let Err(e) = with_deadline(self.deadline, "store.ping", self.store.ping()).await {
            tracing::warn!(error = %e, "Durable store health check failed");
            return Some(REASON_STORE_DOWN);
        }

        match with_deadline(self.deadline, "cache.memory_usage", self.cache.memory_usage()).await {
            Ok(Some(usage)) if usage.ratio() >= self.memory_threshold => {
                tracing::warn!(
                    used_bytes = usage.used_bytes,
                    max_bytes = usage.max_bytes,
                    "Cache memory above threshold"
                );
                Some(REASON_CACHE_MEMORY_HIGH)
            }
            Ok(_) => None,
            // Not knowing the memory figure is not a reason to stop syncing.
            Err(e) => {
                tracing::debug!(error = %e, "Cache memory usage unavailable");
                None
            }
        }
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Re-evaluate degraded-mode conditions every `check_interval` until the
/// shutdown signal is received.
pub async fn run_degraded_monitor(
    mode: DegradedMode,
    probe: Arc<dyn HealthProbe>,
    check_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        check_interval_secs = check_interval.as_secs(),
        "Degraded mode monitor started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Degraded mode monitor shutting down");
                    break;
                }
            }
            _ = ticker.tick() => {
                mode.check_conditions(probe.as_ref()).await;
            }
        }
    }
}
