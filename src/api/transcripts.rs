//! Transcripts, their segments, and the ingest error log.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::error::{invalid, not_found, ApiResult};
use crate::db::{DbIngestError, DbSegment, DbTranscript, DbTranscriptMetrics, SegmentFilter};
use crate::state::AppState;
use crate::types::KnowledgeType;

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptList {
    pub transcripts: Vec<DbTranscript>,
    pub ingest_errors: Vec<DbIngestError>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptDetail {
    #[serde(flatten)]
    pub transcript: DbTranscript,
    pub segments: Vec<DbSegment>,
    pub metrics: Option<DbTranscriptMetrics>,
}

/// GET /api/transcripts
pub async fn list_transcripts(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<TranscriptList>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let db = state.db.lock();
    Ok(Json(TranscriptList {
        transcripts: db.list_transcripts(limit)?,
        ingest_errors: db.list_ingest_errors(limit)?,
    }))
}

/// GET /api/transcripts/:id
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TranscriptDetail>> {
    let db = state.db.lock();
    let transcript = db
        .get_transcript(&id)?
        .ok_or_else(|| not_found("transcript", &id))?;
    Ok(Json(TranscriptDetail {
        segments: db.segments_for_transcript(&id)?,
        metrics: db.get_transcript_metrics(&id)?,
        transcript,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentQuery {
    pub knowledge_type: Option<String>,
    pub tag: Option<String>,
    pub query: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/segments?knowledgeType=&tag=&query=
pub async fn list_segments(
    State(state): State<AppState>,
    Query(query): Query<SegmentQuery>,
) -> ApiResult<Json<Vec<DbSegment>>> {
    let knowledge_type = match query.knowledge_type.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(label) => Some(
            KnowledgeType::parse(label)
                .ok_or_else(|| invalid("knowledgeType", format!("unknown knowledge type '{}'", label)))?,
        ),
    };
    let filter = SegmentFilter {
        knowledge_type,
        tag: query.tag,
        query: query.query,
        limit: Some(query.limit.unwrap_or(DEFAULT_LIMIT)),
    };
    Ok(Json(state.db.lock().list_segments(&filter)?))
}

pub fn transcript_routes() -> Router<AppState> {
    Router::new()
        .route("/api/transcripts", get(list_transcripts))
        .route("/api/transcripts/:id", get(get_transcript))
        .route("/api/segments", get(list_segments))
}
