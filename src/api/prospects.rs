//! Prospects, their signals and contacts, conversion, and outreach.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::error::{invalid, not_found, ApiResult};
use crate::db::{
    Conversion, DbContact, DbError, DbOutreach, DbProspect, DbSignal, NewOutreach, NewProspect,
    OutreachStats, PrismDb, ProspectDetail, ProspectUpdate,
};
use crate::scoring::{self, ProspectScore};
use crate::state::AppState;
use crate::types::{is_valid_tier, EntityKind, OutcomeKind, Persona, ProspectStatus};

const DEFAULT_OVERDUE_DAYS: f64 = 7.0;

#[derive(Debug, Deserialize)]
pub struct ProspectsQuery {
    pub tier: Option<i64>,
    pub status: Option<String>,
}

/// GET /api/prospects?tier=&status=
pub async fn list_prospects(
    State(state): State<AppState>,
    Query(query): Query<ProspectsQuery>,
) -> ApiResult<Json<Vec<DbProspect>>> {
    if let Some(tier) = query.tier {
        if !is_valid_tier(tier) {
            return Err(invalid("tier", "must be 1, 2 or 3"));
        }
    }
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(label) => Some(
            ProspectStatus::parse(label)
                .ok_or_else(|| invalid("status", format!("unknown prospect status '{}'", label)))?,
        ),
    };
    Ok(Json(state.db.lock().list_prospects(query.tier, status)?))
}

/// POST /api/prospects
pub async fn create_prospect(
    State(state): State<AppState>,
    Json(prospect): Json<NewProspect>,
) -> ApiResult<(StatusCode, Json<DbProspect>)> {
    if prospect.company_name.trim().is_empty() {
        return Err(invalid("companyName", "must not be empty"));
    }
    let created = state.db.lock().create_prospect(&prospect)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/prospects/:id
pub async fn get_prospect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProspectDetail>> {
    let detail = state.db.lock().get_prospect_detail(&id)?;
    Ok(Json(detail.ok_or_else(|| not_found("prospect", &id))?))
}

/// PUT /api/prospects/:id
///
/// Disqualifying a prospect records the outcome the learner trains on.
pub async fn update_prospect(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<ProspectUpdate>,
) -> ApiResult<Json<DbProspect>> {
    if update.company_name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(invalid("companyName", "must not be empty"));
    }
    if update.status == Some(ProspectStatus::Converted) {
        return Err(invalid("status", "use POST /api/prospects/{id}/convert"));
    }
    let db = state.db.lock();
    let updated = db.with_transaction(|db| {
        let Some(before) = db.get_prospect(&id)? else {
            return Ok(None);
        };
        let updated = db.update_prospect(&id, &update)?;
        if let Some(after) = updated.as_ref() {
            if before.status != ProspectStatus::Disqualified
                && after.status == ProspectStatus::Disqualified
            {
                db.record_outcome(
                    EntityKind::Prospect,
                    &id,
                    OutcomeKind::ProspectDisqualified,
                    None,
                    None,
                )?;
            }
        }
        Ok::<_, DbError>(updated)
    })?;
    Ok(Json(updated.ok_or_else(|| not_found("prospect", &id))?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSignal {
    pub signal_type: String,
    /// Defaults to the configured weight for the type.
    pub weight: Option<f64>,
    pub description: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalAdded {
    pub signal: DbSignal,
    #[serde(flatten)]
    pub score: ProspectScore,
}

fn default_signal_weight(db: &PrismDb, signal_type: &str) -> Result<Option<f64>, DbError> {
    Ok(db
        .get_config(&format!("signal_weight.{}", signal_type))?
        .and_then(|raw| raw.trim().parse::<f64>().ok()))
}

/// POST /api/prospects/:id/signals
pub async fn add_signal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(signal): Json<NewSignal>,
) -> ApiResult<(StatusCode, Json<SignalAdded>)> {
    let signal_type = signal.signal_type.trim().to_lowercase();
    if signal_type.is_empty() {
        return Err(invalid("signalType", "must not be empty"));
    }
    if signal.weight.is_some_and(|w| !w.is_finite()) {
        return Err(invalid("weight", "must be a number"));
    }

    let db = state.db.lock();
    if db.get_prospect(&id)?.is_none() {
        return Err(not_found("prospect", &id));
    }
    let weight = match signal.weight {
        Some(weight) => weight,
        None => default_signal_weight(&db, &signal_type)?.ok_or_else(|| {
            invalid(
                "weight",
                format!("no default weight for signal type '{}'", signal_type),
            )
        })?,
    };
    let added = db.with_transaction(|db| {
        let added = db.add_signal(
            &id,
            &signal_type,
            weight,
            signal.description.as_deref(),
            signal.source.as_deref(),
        )?;
        db.ensure_learned_weight(&signal_type, weight)?;
        let score = scoring::rescore_prospect(db, &id)?;
        Ok::<_, DbError>(SignalAdded { signal: added, score })
    })?;
    Ok((StatusCode::CREATED, Json(added)))
}

/// DELETE /api/prospects/:id/signals/:signal_id
pub async fn delete_signal(
    State(state): State<AppState>,
    Path((id, signal_id)): Path<(String, String)>,
) -> ApiResult<Json<ProspectScore>> {
    let db = state.db.lock();
    if !db.delete_signal(&id, &signal_id)? {
        return Err(not_found("signal", &signal_id));
    }
    Ok(Json(scoring::rescore_prospect(&db, &id)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    pub name: String,
    pub role: Option<String>,
    pub email: Option<String>,
    pub persona: Option<Persona>,
    pub person_id: Option<String>,
}

/// POST /api/prospects/:id/contacts
pub async fn add_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(contact): Json<NewContact>,
) -> ApiResult<(StatusCode, Json<DbContact>)> {
    if contact.name.trim().is_empty() {
        return Err(invalid("name", "must not be empty"));
    }
    let db = state.db.lock();
    if db.get_prospect(&id)?.is_none() {
        return Err(not_found("prospect", &id));
    }
    let created = db.add_contact(
        &id,
        &contact.name,
        contact.role.as_deref(),
        contact.email.as_deref(),
        contact.persona.unwrap_or(Persona::Unknown),
        contact.person_id.as_deref(),
    )?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /api/prospects/:id/convert
pub async fn convert_prospect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Conversion>> {
    let conversion = state.db.lock().convert_prospect(&id)?;
    let conversion = conversion.ok_or_else(|| not_found("prospect", &id))?;
    if conversion.created {
        log::info!(
            "API: converted prospect {} into deal {}",
            conversion.prospect.id,
            conversion.deal.id
        );
    }
    Ok(Json(conversion))
}

/// POST /api/outreach
pub async fn log_outreach(
    State(state): State<AppState>,
    Json(entry): Json<NewOutreach>,
) -> ApiResult<(StatusCode, Json<DbOutreach>)> {
    let db = state.db.lock();
    if db.get_prospect(&entry.prospect_id)?.is_none() {
        return Err(not_found("prospect", &entry.prospect_id));
    }
    Ok((StatusCode::CREATED, Json(db.log_outreach(&entry)?)))
}

/// GET /api/outreach/stats
pub async fn outreach_stats(State(state): State<AppState>) -> ApiResult<Json<OutreachStats>> {
    let db = state.db.lock();
    let overdue_days = db.config_f64("followup_overdue_days", DEFAULT_OVERDUE_DAYS) as i64;
    Ok(Json(db.outreach_stats(overdue_days)?))
}

pub fn prospect_routes() -> Router<AppState> {
    Router::new()
        .route("/api/prospects", get(list_prospects).post(create_prospect))
        .route("/api/prospects/:id", get(get_prospect).put(update_prospect))
        .route("/api/prospects/:id/signals", post(add_signal))
        .route("/api/prospects/:id/signals/:signal_id", delete(delete_signal))
        .route("/api/prospects/:id/contacts", post(add_contact))
        .route("/api/prospects/:id/convert", post(convert_prospect))
        .route("/api/outreach", post(log_outreach))
        .route("/api/outreach/stats", get(outreach_stats))
}
