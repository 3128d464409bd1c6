//! Health, statistics and metrics endpoints
//!
//! Provides a simple health check for load balancers, a JSON view of live
//! rooms and relay counters, and the Prometheus scrape endpoint.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use voxroom_core::metrics;
use voxroom_core::service::RoomSummary;
use voxroom_sfu::RelayStatsSnapshot;

use super::AppState;

/// Health, stats and metrics router
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
}

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub rooms: usize,
    pub clients: usize,
    pub connections: usize,
    pub relay: RelayStatsSnapshot,
    pub room_list: Vec<RoomSummary>,
}

/// Live room and relay statistics
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let relay = state.relay.stats();
    metrics::observe_relay(&relay);

    Json(StatsResponse {
        rooms: state.registry.room_count(),
        clients: state.registry.client_count(),
        connections: state.connections.len(),
        relay,
        room_list: state.registry.summaries(),
    })
}

/// Prometheus text exposition
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    metrics::observe_relay(&state.relay.stats());

    match metrics::gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to gather metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
