use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{sse::Event, IntoResponse, Sse},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use stratus_common::FleetError;
use stratus_fleet::WarmStrategy;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub health_score: f64,
}

/// POST /v1/nodes/:id/heartbeat — layer 1 of the safety monitor.
pub async fn heartbeat(
    State(st): State<AppState>,
    Path(node_id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    match st.monitor.record_heartbeat(&node_id, req.health_score).await {
        Ok(()) => {
            st.metrics.heartbeats_total.fetch_add(1, Ordering::Relaxed);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(FleetError::NodeNotFound(_)) => {
            st.metrics
                .heartbeats_rejected_total
                .fetch_add(1, Ordering::Relaxed);
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": { "message": format!("node not found: {node_id}") } })),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": { "message": e.to_string() } })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<usize>,
    pub since_ms: Option<u64>,
}

/// GET /v1/nodes/:id/logs — launch-log tail.
pub async fn get_node_logs(
    State(st): State<AppState>,
    Path(node_id): Path<String>,
    Query(q): Query<LogsQuery>,
) -> impl IntoResponse {
    let entries = st.logs.get_logs(&node_id, q.tail.unwrap_or(0), q.since_ms);
    Json(entries)
}

/// GET /v1/nodes/:id/logs/stream — history, then 500ms-polled updates,
/// as SSE. Ends when the client disconnects.
pub async fn stream_node_logs(
    State(st): State<AppState>,
    Path(node_id): Path<String>,
    Query(q): Query<LogsQuery>,
) -> impl IntoResponse {
    let rx = st.logs.stream(&node_id, q.tail.unwrap_or(0), q.since_ms);
    let stream = ReceiverStream::new(rx).map(|entry| Event::default().json_data(&entry));

    Sse::new(stream)
        .keep_alive(axum::response::sse::KeepAlive::new().interval(Duration::from_secs(15)))
}

#[derive(Debug, Deserialize, Default)]
pub struct WarmupRequest {
    pub strategy: Option<WarmStrategy>,
}

/// POST /v1/models/:model/warmup — operator-triggered cache warming.
pub async fn warmup_model(
    State(st): State<AppState>,
    Path(model_name): Path<String>,
    body: Option<Json<WarmupRequest>>,
) -> impl IntoResponse {
    st.metrics
        .warmups_requested_total
        .fetch_add(1, Ordering::Relaxed);

    let strategy = body
        .and_then(|Json(b)| b.strategy)
        .unwrap_or(WarmStrategy::Full);

    match st.warmer.prewarm_with_strategy(&model_name, strategy).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "model": model_name, "status": "warmed" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": { "message": e.to_string() } })),
        )
            .into_response(),
    }
}

/// GET /v1/deployments — all deployments with their cached counts.
pub async fn list_deployments(State(st): State<AppState>) -> impl IntoResponse {
    match st.registry.list_deployments().await {
        Ok(deployments) => Json(deployments).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": { "message": e.to_string() } })),
        )
            .into_response(),
    }
}

/// PUT /v1/deployments — create or replace a deployment. The controller
/// picks it up on its next tick.
pub async fn upsert_deployment(
    State(st): State<AppState>,
    Json(deployment): Json<stratus_common::Deployment>,
) -> impl IntoResponse {
    match st.registry.upsert_deployment(deployment).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": { "message": e.to_string() } })),
        )
            .into_response(),
    }
}

/// GET /v1/nodes/:id — node detail for operator surfaces.
pub async fn get_node(
    State(st): State<AppState>,
    Path(node_id): Path<String>,
) -> impl IntoResponse {
    match st.registry.get_node(&node_id).await {
        Ok(Some(node)) => Json(node).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": { "message": format!("node not found: {node_id}") } })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": { "message": e.to_string() } })),
        )
            .into_response(),
    }
}
