use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::{not_found, ApiResult};
use crate::db::DbQuery;
use crate::retrieval::AskResponse;
use crate::state::AppState;
use crate::types::AnswerFeedback;

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub query: String,
    pub session_id: Option<String>,
}

/// POST /api/ask
///
/// An unavailable model still answers 200 with a degraded, cited answer.
/// A question superseded by a newer one in the same session gets 409.
pub async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> ApiResult<Json<AskResponse>> {
    let response = state
        .queries
        .ask(&request.query, request.session_id.as_deref())
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub feedback: AnswerFeedback,
}

/// POST /api/ask/:id/feedback
pub async fn feedback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<Json<Value>> {
    if !state.db.lock().set_query_feedback(&id, request.feedback)? {
        return Err(not_found("query", &id));
    }
    Ok(Json(json!({ "id": id, "feedback": request.feedback })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub session_id: Option<String>,
}

/// GET /api/ask/history?limit=
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<DbQuery>>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(
        state
            .db
            .lock()
            .query_history(query.session_id.as_deref(), limit)?,
    ))
}

pub fn ask_routes() -> Router<AppState> {
    Router::new()
        .route("/api/ask", post(ask))
        .route("/api/ask/history", get(history))
        .route("/api/ask/:id/feedback", post(feedback))
}
