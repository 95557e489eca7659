//! Deals, their MEDDPICC scorecards, and the objection library.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::error::{invalid, not_found, ApiResult};
use crate::db::{DbDeal, DbMeddpiccEntry, DbObjection, DbSegment, DealUpdate, NewDeal};
use crate::state::AppState;
use crate::types::{DealStatus, EntityKind, MeddpiccLetter, MeddpiccStatus, OutcomeKind};

const DEAL_SEGMENT_LIMIT: usize = 20;
const DEFAULT_OBJECTION_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct DealsQuery {
    pub status: Option<String>,
}

fn parse_status(raw: Option<&str>) -> ApiResult<Option<DealStatus>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(label) => DealStatus::parse(label)
            .map(Some)
            .ok_or_else(|| invalid("status", format!("unknown deal status '{}'", label))),
    }
}

/// GET /api/deals
pub async fn list_deals(
    State(state): State<AppState>,
    Query(query): Query<DealsQuery>,
) -> ApiResult<Json<Vec<DbDeal>>> {
    let status = parse_status(query.status.as_deref())?;
    Ok(Json(state.db.lock().list_deals(status)?))
}

/// POST /api/deals
pub async fn create_deal(
    State(state): State<AppState>,
    Json(deal): Json<NewDeal>,
) -> ApiResult<(StatusCode, Json<DbDeal>)> {
    if deal.company_name.trim().is_empty() {
        return Err(invalid("companyName", "must not be empty"));
    }
    let created = state.db.lock().create_deal(&deal)?;
    log::info!("API: created deal {} for {}", created.id, created.company_name);
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DealDetail {
    #[serde(flatten)]
    pub deal: DbDeal,
    pub meddpicc: Vec<DbMeddpiccEntry>,
    pub recent_segments: Vec<DbSegment>,
}

/// GET /api/deals/:id
pub async fn get_deal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DealDetail>> {
    let db = state.db.lock();
    let deal = db.get_deal(&id)?.ok_or_else(|| not_found("deal", &id))?;
    Ok(Json(DealDetail {
        meddpicc: db.get_deal_meddpicc(&id)?,
        recent_segments: db.segments_for_deal(&id, DEAL_SEGMENT_LIMIT)?,
        deal,
    }))
}

/// PUT /api/deals/:id
///
/// Moving a deal to won or lost records the outcome the learner trains on.
pub async fn update_deal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<DealUpdate>,
) -> ApiResult<Json<DbDeal>> {
    let db = state.db.lock();
    let deal = db.with_transaction(|db| {
        let Some((previous, deal)) = db.update_deal(&id, &update)? else {
            return Ok(None);
        };
        if !previous.is_closed() && deal.status.is_closed() {
            let outcome = match deal.status {
                DealStatus::Won => OutcomeKind::DealWon,
                _ => OutcomeKind::DealLost,
            };
            db.record_outcome(EntityKind::Deal, &deal.id, outcome, deal.value_amount, None)?;
            log::info!("API: deal {} closed as {}", deal.id, deal.status);
        }
        Ok::<_, crate::db::DbError>(Some(deal))
    })?;
    Ok(Json(deal.ok_or_else(|| not_found("deal", &id))?))
}

/// GET /api/deals/:id/meddpicc
pub async fn get_meddpicc(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<DbMeddpiccEntry>>> {
    let db = state.db.lock();
    if db.get_deal(&id)?.is_none() {
        return Err(not_found("deal", &id));
    }
    Ok(Json(db.get_deal_meddpicc(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct MeddpiccEdit {
    pub status: MeddpiccStatus,
    pub evidence: Option<String>,
}

/// PUT /api/deals/:id/meddpicc/:letter
///
/// The only path that can move a letter downward.
pub async fn set_meddpicc(
    State(state): State<AppState>,
    Path((id, letter)): Path<(String, String)>,
    Json(edit): Json<MeddpiccEdit>,
) -> ApiResult<Json<Vec<DbMeddpiccEntry>>> {
    let letter = MeddpiccLetter::parse(&letter.trim().to_uppercase())
        .ok_or_else(|| invalid("letter", format!("unknown MEDDPICC letter '{}'", letter)))?;
    let db = state.db.lock();
    if db.get_deal(&id)?.is_none() {
        return Err(not_found("deal", &id));
    }
    db.set_meddpicc(&id, letter, edit.status, edit.evidence.as_deref())?;
    Ok(Json(db.get_deal_meddpicc(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct ObjectionQuery {
    pub limit: Option<usize>,
}

/// GET /api/objections
pub async fn list_objections(
    State(state): State<AppState>,
    Query(query): Query<ObjectionQuery>,
) -> ApiResult<Json<Vec<DbObjection>>> {
    let limit = query.limit.unwrap_or(DEFAULT_OBJECTION_LIMIT);
    Ok(Json(state.db.lock().objections_by_frequency(limit)?))
}

pub fn deal_routes() -> Router<AppState> {
    Router::new()
        .route("/api/deals", get(list_deals).post(create_deal))
        .route("/api/deals/:id", get(get_deal).put(update_deal))
        .route("/api/deals/:id/meddpicc", get(get_meddpicc))
        .route("/api/deals/:id/meddpicc/:letter", put(set_meddpicc))
        .route("/api/objections", get(list_objections))
}
