mod args;
mod handlers;
mod metrics;
mod state;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use tracing::{info, warn};

use stratus_fleet::{
    ControllerConfig, DeploymentController, EventBus, ModelCacheWarmer, MonitorConfig,
    NodeLogStore, NullLatencyProbe, ReconcilerConfig, SizeClassAdvisor, StateReconciler,
    TripleSafetyMonitor, WarmerConfig,
};
use stratus_provision::{HttpProvisioner, Provisioner, SimProvisioner};
use stratus_registry::{MemoryRegistry, Registry};

use crate::args::Args;
use crate::handlers::{
    get_node, get_node_logs, heartbeat, list_deployments, stream_node_logs, upsert_deployment,
    warmup_model,
};
use crate::metrics::{healthz_handler, metrics_handler, SharedMetrics};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let tracer_provider = stratus_common::telemetry::init_tracing(
        "stratus-fleetd",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
    );

    info!("stratus-fleetd starting...");

    let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());

    let provisioner: Arc<dyn Provisioner> = match &args.provisioner_url {
        Some(url) => {
            info!(url = %url, "using provisioning service");
            Arc::new(HttpProvisioner::new(
                url.clone(),
                args.provisioner_token.clone(),
                Duration::from_secs(300),
            ))
        }
        None => {
            warn!("no provisioner configured, running against the in-memory simulator");
            Arc::new(SimProvisioner::new())
        }
    };

    let bus = Arc::new(EventBus::new());
    let logs = Arc::new(NodeLogStore::new());
    let shared_metrics = Arc::new(SharedMetrics::default());

    let monitor = TripleSafetyMonitor::new(
        registry.clone(),
        provisioner.clone(),
        bus.clone(),
        MonitorConfig {
            poll_interval: Duration::from_secs(args.poll_interval_secs),
            cloud_check_interval: Duration::from_secs(args.cloud_check_interval_secs),
            ..MonitorConfig::default()
        },
    );

    let warmer = ModelCacheWarmer::new(
        registry.clone(),
        provisioner.clone(),
        WarmerConfig {
            warm_interval: Duration::from_secs(args.warm_interval_secs),
            ..WarmerConfig::default()
        },
    );

    let reconciler = Arc::new(StateReconciler::new(
        registry.clone(),
        provisioner.clone(),
        monitor.clone(),
        ReconcilerConfig {
            interval: Duration::from_secs(args.reconcile_interval_secs),
            auto_terminate_orphans: args.auto_terminate_orphans,
            cluster_prefix: args.cluster_prefix.clone(),
            ..ReconcilerConfig::default()
        },
    ));

    // The routing layer registers its real latency probe out of band;
    // without one, latency never triggers a scale-up.
    let controller = Arc::new(DeploymentController::new(
        registry.clone(),
        provisioner.clone(),
        Arc::new(NullLatencyProbe),
        Arc::new(SizeClassAdvisor),
        bus.clone(),
        logs.clone(),
        warmer.clone(),
        ControllerConfig {
            interval: Duration::from_secs(args.deploy_interval_secs),
            cluster_prefix: args.cluster_prefix.clone(),
            ..ControllerConfig::default()
        },
    ));

    spawn_loops(
        monitor.clone(),
        reconciler,
        controller,
        warmer.clone(),
        shared_metrics.clone(),
    );

    let st = AppState {
        registry,
        monitor,
        warmer,
        logs,
        bus,
        metrics: shared_metrics,
    };

    let app = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/nodes/:id", get(get_node))
        .route("/v1/nodes/:id/heartbeat", post(heartbeat))
        .route("/v1/nodes/:id/logs", get(get_node_logs))
        .route("/v1/nodes/:id/logs/stream", get(stream_node_logs))
        .route("/v1/models/:model/warmup", post(warmup_model))
        .route(
            "/v1/deployments",
            get(list_deployments).put(upsert_deployment),
        )
        .with_state(st);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(listen = %args.listen, "control plane listening");
    axum::serve(listener, app).await?;

    if let Some(provider) = tracer_provider {
        let _ = provider.shutdown();
    }
    Ok(())
}

/// Every loop ticks independently and survives its own bad passes; a
/// failed pass is logged, counted and retried on the next tick.
fn spawn_loops(
    monitor: Arc<TripleSafetyMonitor>,
    reconciler: Arc<StateReconciler>,
    controller: Arc<DeploymentController>,
    warmer: Arc<ModelCacheWarmer>,
    metrics: Arc<SharedMetrics>,
) {
    // Layer 2: active polling.
    {
        let monitor = monitor.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let interval = monitor.config().poll_interval;
            info!(interval_secs = interval.as_secs(), "poll loop started");
            loop {
                tokio::time::sleep(interval).await;
                metrics.poll_passes_total.fetch_add(1, Ordering::Relaxed);
                monitor.poll_pass().await;
            }
        });
    }

    // Layer 3: cloud verification.
    {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let interval = monitor.config().cloud_check_interval;
            info!(interval_secs = interval.as_secs(), "cloud verification loop started");
            loop {
                tokio::time::sleep(interval).await;
                metrics
                    .cloud_verify_passes_total
                    .fetch_add(1, Ordering::Relaxed);
                monitor.cloud_verify_pass().await;
            }
        });
    }

    // State reconciliation, with one unconditional pass at startup.
    {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let interval = reconciler.config().interval;
            info!(interval_secs = interval.as_secs(), "state reconciler started");
            loop {
                metrics.reconcile_total.fetch_add(1, Ordering::Relaxed);
                match reconciler.reconcile_once().await {
                    Ok(summary) => {
                        metrics
                            .orphans_terminated_total
                            .fetch_add(summary.orphans_terminated as u64, Ordering::Relaxed);
                        metrics
                            .ghosts_marked_total
                            .fetch_add(summary.ghosts_marked as u64, Ordering::Relaxed);
                        metrics
                            .statuses_synced_total
                            .fetch_add(summary.statuses_synced as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        metrics.reconcile_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "state reconciliation pass failed");
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    // Deployment reconciliation.
    {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let interval = controller.config().interval;
            info!(interval_secs = interval.as_secs(), "deployment controller started");
            loop {
                tokio::time::sleep(interval).await;
                metrics
                    .deploy_reconcile_total
                    .fetch_add(1, Ordering::Relaxed);
                if let Err(e) = controller.reconcile_once().await {
                    metrics
                        .deploy_reconcile_errors
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "deployment reconciliation pass failed");
                }
            }
        });
    }

    // Predictive cache warming.
    if warmer.config().predictive_enabled {
        tokio::spawn(async move {
            let interval = warmer.config().warm_interval;
            info!(interval_secs = interval.as_secs(), "predictive cache warming started");
            loop {
                tokio::time::sleep(interval).await;
                metrics
                    .predictive_warm_total
                    .fetch_add(1, Ordering::Relaxed);
                warmer.predictive_pass().await;
            }
        });
    }
}
