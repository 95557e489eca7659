use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::error::{invalid, not_found, ApiResult};
use crate::db::{DbPerson, DbSegment, PersonUpdate};
use crate::state::AppState;

const DEFAULT_SEGMENT_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct PeopleQuery {
    pub search: Option<String>,
}

/// GET /api/people
pub async fn list_people(
    State(state): State<AppState>,
    Query(query): Query<PeopleQuery>,
) -> ApiResult<Json<Vec<DbPerson>>> {
    let db = state.db.lock();
    let people = match query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(needle) => db.search_people(needle)?,
        None => db.list_people()?,
    };
    Ok(Json(people))
}

/// GET /api/people/:id
pub async fn get_person(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DbPerson>> {
    let person = state.db.lock().get_person(&id)?;
    Ok(Json(person.ok_or_else(|| not_found("person", &id))?))
}

#[derive(Debug, Deserialize)]
pub struct SegmentLimit {
    pub limit: Option<usize>,
}

/// GET /api/people/:id/segments
pub async fn person_segments(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SegmentLimit>,
) -> ApiResult<Json<Vec<DbSegment>>> {
    let db = state.db.lock();
    if db.get_person(&id)?.is_none() {
        return Err(not_found("person", &id));
    }
    Ok(Json(db.segments_for_person(&id, query.limit.unwrap_or(DEFAULT_SEGMENT_LIMIT))?))
}

/// PUT /api/people/:id
pub async fn update_person(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<PersonUpdate>,
) -> ApiResult<Json<DbPerson>> {
    if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(invalid("name", "must not be empty"));
    }
    let person = state.db.lock().update_person(&id, &update)?;
    Ok(Json(person.ok_or_else(|| not_found("person", &id))?))
}

pub fn people_routes() -> Router<AppState> {
    Router::new()
        .route("/api/people", get(list_people))
        .route("/api/people/:id", get(get_person).put(update_person))
        .route("/api/people/:id/segments", get(person_segments))
}
