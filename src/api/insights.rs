//! Learned insights and the learner itself.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::error::{invalid, not_found, ApiResult};
use crate::db::DbInsight;
use crate::learning::{self, LearningReport, LearningStatus};
use crate::state::AppState;
use crate::types::{InsightStatus, InsightType};

#[derive(Debug, Deserialize)]
pub struct InsightsQuery {
    pub active: Option<bool>,
}

/// GET /api/insights?active=true
pub async fn list_insights(
    State(state): State<AppState>,
    Query(query): Query<InsightsQuery>,
) -> ApiResult<Json<Vec<DbInsight>>> {
    let active_only = query.active.unwrap_or(false);
    Ok(Json(state.db.lock().list_insights(active_only, None)?))
}

fn live_insights(state: &AppState, insight_type: InsightType) -> ApiResult<Json<Vec<DbInsight>>> {
    Ok(Json(state.db.lock().list_insights(true, Some(insight_type))?))
}

/// GET /api/insights/icp
pub async fn icp_insights(State(state): State<AppState>) -> ApiResult<Json<Vec<DbInsight>>> {
    live_insights(&state, InsightType::Icp)
}

/// GET /api/insights/patterns
pub async fn pattern_insights(State(state): State<AppState>) -> ApiResult<Json<Vec<DbInsight>>> {
    live_insights(&state, InsightType::Pattern)
}

/// GET /api/insights/coaching
pub async fn coaching_insights(State(state): State<AppState>) -> ApiResult<Json<Vec<DbInsight>>> {
    live_insights(&state, InsightType::Coaching)
}

#[derive(Debug, Deserialize)]
pub struct InsightFeedback {
    pub feedback: String,
    /// `validated` or `invalidated`.
    pub status: Option<InsightStatus>,
}

/// POST /api/insights/:id/feedback
pub async fn insight_feedback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<InsightFeedback>,
) -> ApiResult<Json<DbInsight>> {
    if let Some(status) = request.status {
        if !matches!(status, InsightStatus::Validated | InsightStatus::Invalidated) {
            return Err(invalid("status", "must be validated or invalidated"));
        }
    }
    let insight = state
        .db
        .lock()
        .set_insight_feedback(&id, request.feedback.trim(), request.status)?;
    Ok(Json(insight.ok_or_else(|| not_found("insight", &id))?))
}

/// POST /api/learning/analyze
pub async fn analyze(State(state): State<AppState>) -> ApiResult<Json<LearningReport>> {
    let report = learning::run_analysis(&state.db.lock(), "manual")?;
    Ok(Json(report))
}

/// GET /api/learning/status
pub async fn status(State(state): State<AppState>) -> ApiResult<Json<LearningStatus>> {
    let next_run = state
        .scheduler
        .as_ref()
        .and_then(|s| s.next_run())
        .map(|t| t.to_rfc3339());
    Ok(Json(learning::learning_status(&state.db.lock(), next_run)?))
}

pub fn insight_routes() -> Router<AppState> {
    Router::new()
        .route("/api/insights", get(list_insights))
        .route("/api/insights/icp", get(icp_insights))
        .route("/api/insights/patterns", get(pattern_insights))
        .route("/api/insights/coaching", get(coaching_insights))
        .route("/api/insights/:id/feedback", post(insight_feedback))
        .route("/api/learning/analyze", post(analyze))
        .route("/api/learning/status", get(status))
}
