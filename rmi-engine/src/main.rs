//! RMI Sync Worker Entry Point
//!
//! Builds the engine from `RMI_*` environment variables, then runs the sync
//! worker and the degraded-mode monitor until Ctrl-C.

use std::sync::Arc;

use rmi_engine::telemetry::{init_tracing, TelemetryConfig};
use rmi_engine::{
    run_degraded_monitor, ApiError, ApiResult, DegradedMode, EngineContext, EngineSettings,
    HealthProbe, WorkerConfig,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let settings = EngineSettings::from_env()?;
    let worker_config = WorkerConfig::from_env();
    let ctx = EngineContext::from_settings(&settings, None)?;

    let degraded = DegradedMode::new();
    let probe: Arc<dyn HealthProbe> = Arc::new(ctx.health_probe(worker_config.memory_threshold));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor = tokio::spawn(run_degraded_monitor(
        degraded.clone(),
        probe,
        worker_config.degraded_check_interval,
        shutdown_rx.clone(),
    ));
    let worker = tokio::spawn(ctx.sync_worker(worker_config, degraded).run(shutdown_rx));

    tracing::info!(
        service = %telemetry_config.service_name,
        environment = %telemetry_config.environment,
        "RMI sync worker running"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to listen for Ctrl-C: {}", e)))?;
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    let metrics = worker
        .await
        .map_err(|e| ApiError::internal_error(format!("Sync worker task failed: {}", e)))?;
    monitor
        .await
        .map_err(|e| ApiError::internal_error(format!("Degraded monitor task failed: {}", e)))?;

    let snapshot = metrics.snapshot();
    tracing::info!(
        jobs_succeeded = snapshot.jobs_succeeded,
        jobs_dead_lettered = snapshot.jobs_dead_lettered,
        "RMI sync worker stopped"
    );
    Ok(())
}
