use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::error::ApiResult;
use crate::db::DashboardStats;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub ai_enabled: bool,
    pub ai_provider: &'static str,
    pub ai_model: String,
    pub version: &'static str,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let ai = state.llm.health().await;
    Json(HealthResponse {
        status: if ai.is_ready() { "ok" } else { "degraded" },
        ai_enabled: ai.is_ready(),
        ai_provider: state.llm.provider_name(),
        ai_model: state.llm.model().to_string(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /api/stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<DashboardStats>> {
    Ok(Json(state.db.lock().dashboard_stats()?))
}

pub fn system_routes() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/stats", get(stats))
}
