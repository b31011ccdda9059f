use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::State;
use axum::response::IntoResponse;

use crate::state::AppState;

/// Shared metrics for the control plane, safe for concurrent access.
#[derive(Debug, Default)]
pub struct SharedMetrics {
    /// State reconciliation passes.
    pub reconcile_total: AtomicU64,
    /// State reconciliation passes that failed.
    pub reconcile_errors: AtomicU64,
    /// Orphan clusters terminated.
    pub orphans_terminated_total: AtomicU64,
    /// Ghost nodes marked dead.
    pub ghosts_marked_total: AtomicU64,
    /// Node statuses synced from the cloud view.
    pub statuses_synced_total: AtomicU64,
    /// Deployment reconciliation passes.
    pub deploy_reconcile_total: AtomicU64,
    /// Deployment reconciliation passes that failed.
    pub deploy_reconcile_errors: AtomicU64,
    /// Active liveness poll passes.
    pub poll_passes_total: AtomicU64,
    /// Cloud verification passes.
    pub cloud_verify_passes_total: AtomicU64,
    /// Predictive warm passes.
    pub predictive_warm_total: AtomicU64,
    /// Heartbeats accepted.
    pub heartbeats_total: AtomicU64,
    /// Heartbeats for unknown nodes.
    pub heartbeats_rejected_total: AtomicU64,
    /// Manual warm-up requests served.
    pub warmups_requested_total: AtomicU64,
}

/// GET /metrics — Prometheus text exposition format.
pub async fn metrics_handler(State(st): State<AppState>) -> impl IntoResponse {
    let m = &st.metrics;
    let body = format!(
        "# HELP stratus_reconcile_total State reconciliation passes.\n\
         # TYPE stratus_reconcile_total counter\n\
         stratus_reconcile_total {}\n\
         # HELP stratus_reconcile_errors State reconciliation failures.\n\
         # TYPE stratus_reconcile_errors counter\n\
         stratus_reconcile_errors {}\n\
         # HELP stratus_orphans_terminated_total Orphan clusters terminated.\n\
         # TYPE stratus_orphans_terminated_total counter\n\
         stratus_orphans_terminated_total {}\n\
         # HELP stratus_ghosts_marked_total Ghost nodes marked dead.\n\
         # TYPE stratus_ghosts_marked_total counter\n\
         stratus_ghosts_marked_total {}\n\
         # HELP stratus_statuses_synced_total Node statuses synced from the cloud view.\n\
         # TYPE stratus_statuses_synced_total counter\n\
         stratus_statuses_synced_total {}\n\
         # HELP stratus_deploy_reconcile_total Deployment reconciliation passes.\n\
         # TYPE stratus_deploy_reconcile_total counter\n\
         stratus_deploy_reconcile_total {}\n\
         # HELP stratus_deploy_reconcile_errors Deployment reconciliation failures.\n\
         # TYPE stratus_deploy_reconcile_errors counter\n\
         stratus_deploy_reconcile_errors {}\n\
         # HELP stratus_poll_passes_total Active liveness poll passes.\n\
         # TYPE stratus_poll_passes_total counter\n\
         stratus_poll_passes_total {}\n\
         # HELP stratus_cloud_verify_passes_total Cloud verification passes.\n\
         # TYPE stratus_cloud_verify_passes_total counter\n\
         stratus_cloud_verify_passes_total {}\n\
         # HELP stratus_predictive_warm_total Predictive warm passes.\n\
         # TYPE stratus_predictive_warm_total counter\n\
         stratus_predictive_warm_total {}\n\
         # HELP stratus_heartbeats_total Heartbeats accepted.\n\
         # TYPE stratus_heartbeats_total counter\n\
         stratus_heartbeats_total {}\n\
         # HELP stratus_heartbeats_rejected_total Heartbeats for unknown nodes.\n\
         # TYPE stratus_heartbeats_rejected_total counter\n\
         stratus_heartbeats_rejected_total {}\n\
         # HELP stratus_warmups_requested_total Manual warm-up requests served.\n\
         # TYPE stratus_warmups_requested_total counter\n\
         stratus_warmups_requested_total {}\n",
        m.reconcile_total.load(Ordering::Relaxed),
        m.reconcile_errors.load(Ordering::Relaxed),
        m.orphans_terminated_total.load(Ordering::Relaxed),
        m.ghosts_marked_total.load(Ordering::Relaxed),
        m.statuses_synced_total.load(Ordering::Relaxed),
        m.deploy_reconcile_total.load(Ordering::Relaxed),
        m.deploy_reconcile_errors.load(Ordering::Relaxed),
        m.poll_passes_total.load(Ordering::Relaxed),
        m.cloud_verify_passes_total.load(Ordering::Relaxed),
        m.predictive_warm_total.load(Ordering::Relaxed),
        m.heartbeats_total.load(Ordering::Relaxed),
        m.heartbeats_rejected_total.load(Ordering::Relaxed),
        m.warmups_requested_total.load(Ordering::Relaxed),
    );
    (axum::http::StatusCode::OK, body)
}

/// GET /healthz — simple liveness probe.
pub async fn healthz_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "ok")
}
