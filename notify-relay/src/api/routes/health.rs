//! Health check routes.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::api::server::AppState;
use crate::notification::RegistryStats;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health_check))
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    /// Always "healthy" when the server answers.
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Live push connections and delivery counters.
    pub push: RegistryStats,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        push: state.registry.stats(),
    })
}
