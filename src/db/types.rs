//! Shared type definitions for the database layer.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    DealStatus, Effectiveness, EntityKind, InsightPriority, InsightStatus, InsightType,
    KnowledgeType, MeddpiccLetter, MeddpiccStatus, OutcomeKind, OutreachDirection,
    OutreachMethod, OutreachOutcome, Persona, ProspectStatus, RelationshipType, TranscriptFormat,
    TranscriptStatus,
};

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Stored JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
}

/// Closed-set enums are stored as their string label. Reading an unknown
/// label is a conversion error, never a silent default.
macro_rules! sql_label {
    ($($name:ty),+ $(,)?) => {
        $(
            impl ToSql for $name {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $name {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    let label = value.as_str()?;
                    <$name>::parse(label).ok_or_else(|| {
                        FromSqlError::Other(
                            format!("unknown {} label '{}'", stringify!($name), label).into(),
                        )
                    })
                }
            }
        )+
    };
}

sql_label!(
    KnowledgeType,
    RelationshipType,
    DealStatus,
    MeddpiccLetter,
    MeddpiccStatus,
    Effectiveness,
    InsightStatus,
    InsightType,
    InsightPriority,
    ProspectStatus,
    Persona,
    OutreachMethod,
    OutreachDirection,
    OutreachOutcome,
    OutcomeKind,
    TranscriptStatus,
    TranscriptFormat,
    EntityKind,
);

// ---------------------------------------------------------------------------
// Transcripts and segments
// ---------------------------------------------------------------------------

/// Input for [`super::PrismDb::upsert_transcript`].
#[derive(Debug, Clone)]
pub struct NewTranscript {
    pub filename: String,
    pub original_path: String,
    pub raw_content: String,
    pub content_hash: String,
    pub format: TranscriptFormat,
    pub duration_minutes: Option<f64>,
    pub call_date: Option<String>,
    pub call_type: Option<String>,
    pub context: Option<String>,
    pub speakers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertedTranscript {
    pub id: String,
    pub was_new: bool,
}

/// A row from `transcripts`, without the raw content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbTranscript {
    pub id: String,
    pub filename: String,
    pub original_path: String,
    pub content_hash: String,
    pub format: TranscriptFormat,
    pub duration_minutes: Option<f64>,
    pub call_date: Option<String>,
    pub call_type: Option<String>,
    pub context: Option<String>,
    pub speakers: Vec<String>,
    pub status: TranscriptStatus,
    pub needs_reprocess: bool,
    pub processed_at: Option<String>,
    pub created_at: String,
    pub segment_count: i64,
}

/// Input row for [`super::PrismDb::replace_segments`].
#[derive(Debug, Clone)]
pub struct NewSegment {
    pub position: i64,
    pub content: String,
    pub speaker: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub knowledge_type: KnowledgeType,
    pub summary: Option<String>,
    pub confidence: f64,
    pub importance: Option<String>,
    pub sentiment: Option<String>,
    pub actionable: bool,
    pub tags: Vec<(String, f64)>,
}

/// A row from `segments`, joined with its transcript's filename and call date.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSegment {
    pub id: String,
    pub transcript_id: String,
    pub position: i64,
    pub content: String,
    pub speaker: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub knowledge_type: KnowledgeType,
    pub summary: Option<String>,
    pub confidence: f64,
    pub importance: Option<String>,
    pub sentiment: Option<String>,
    pub actionable: bool,
    pub tags: Vec<String>,
    pub filename: String,
    pub call_date: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentFilter {
    pub knowledge_type: Option<KnowledgeType>,
    pub tag: Option<String>,
    pub query: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbTranscriptMetrics {
    pub transcript_id: String,
    pub talk_ratio: Option<f64>,
    pub user_words: i64,
    pub total_words: i64,
    pub question_count: i64,
    pub user_question_count: i64,
    pub speaker_count: i64,
    pub strong_moments: Vec<String>,
    pub improvement_areas: Vec<String>,
    pub computed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbIngestError {
    pub id: String,
    pub path: String,
    pub kind: String,
    pub message: String,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// People and deals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbPerson {
    pub id: String,
    pub name: String,
    pub role: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub relationship_type: RelationshipType,
    pub mention_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Person identity columns for the entity linker's similarity pass.
#[derive(Debug, Clone)]
pub struct PersonCandidate {
    pub id: String,
    pub name: String,
    pub name_norm: String,
    pub company_norm: String,
}

/// Partial update for a person. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonUpdate {
    pub name: Option<String>,
    pub role: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub relationship_type: Option<RelationshipType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbDeal {
    pub id: String,
    pub company_name: String,
    pub contact_name: Option<String>,
    pub contact_role: Option<String>,
    pub status: DealStatus,
    pub value_amount: Option<f64>,
    pub value_currency: String,
    pub expected_close_date: Option<String>,
    pub industry: Option<String>,
    pub employee_range: Option<String>,
    pub last_activity_at: Option<String>,
    pub closed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Number of MEDDPICC letters at `identified`.
    pub meddpicc_identified: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDeal {
    pub company_name: String,
    pub contact_name: Option<String>,
    pub contact_role: Option<String>,
    pub status: Option<DealStatus>,
    pub value_amount: Option<f64>,
    pub value_currency: Option<String>,
    pub expected_close_date: Option<String>,
    pub industry: Option<String>,
    pub employee_range: Option<String>,
}

/// Partial update for a deal. Moving to `won`/`lost` stamps `closed_at`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealUpdate {
    pub contact_name: Option<String>,
    pub contact_role: Option<String>,
    pub status: Option<DealStatus>,
    pub value_amount: Option<f64>,
    pub value_currency: Option<String>,
    pub expected_close_date: Option<String>,
    pub industry: Option<String>,
    pub employee_range: Option<String>,
}

/// Lightweight row used by the entity linker's similarity pass.
#[derive(Debug, Clone)]
pub struct DealCandidate {
    pub id: String,
    pub company_name: String,
    pub company_norm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbMeddpiccEntry {
    pub letter: MeddpiccLetter,
    pub label: String,
    pub status: MeddpiccStatus,
    pub evidence: Option<String>,
    pub source_segment_id: Option<String>,
    pub confidence: f64,
    pub updated_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Objections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbObjection {
    pub id: String,
    pub text: String,
    pub category: Option<String>,
    pub frequency: i64,
    pub first_seen: String,
    pub last_seen: String,
    pub responses: Vec<DbObjectionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbObjectionResponse {
    pub id: String,
    pub objection_id: String,
    pub response_text: String,
    pub effectiveness: Effectiveness,
    pub source_segment_id: Option<String>,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Prospects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbProspect {
    pub id: String,
    pub company_name: String,
    pub industry: Option<String>,
    pub employee_range: Option<String>,
    pub website: Option<String>,
    pub tier: i64,
    pub score: f64,
    pub status: ProspectStatus,
    pub notes: Option<String>,
    pub converted_deal_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub signal_count: i64,
    pub contact_count: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProspect {
    pub company_name: String,
    pub industry: Option<String>,
    pub employee_range: Option<String>,
    pub website: Option<String>,
    pub status: Option<ProspectStatus>,
    pub notes: Option<String>,
}

/// Partial update for a prospect. Score and tier are derived and not editable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProspectUpdate {
    pub company_name: Option<String>,
    pub industry: Option<String>,
    pub employee_range: Option<String>,
    pub website: Option<String>,
    pub status: Option<ProspectStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSignal {
    pub id: String,
    pub prospect_id: String,
    pub signal_type: String,
    pub weight: f64,
    pub description: Option<String>,
    pub source: Option<String>,
    pub detected_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbContact {
    pub id: String,
    pub prospect_id: String,
    pub name: String,
    pub role: Option<String>,
    pub email: Option<String>,
    pub persona: Persona,
    pub person_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbOutreach {
    pub id: String,
    pub prospect_id: String,
    pub company_name: String,
    pub contact_id: Option<String>,
    pub method: OutreachMethod,
    pub direction: OutreachDirection,
    pub outcome: OutreachOutcome,
    pub notes: Option<String>,
    pub occurred_at: String,
    pub next_followup_date: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOutreach {
    pub prospect_id: String,
    pub contact_id: Option<String>,
    pub method: OutreachMethod,
    pub direction: Option<OutreachDirection>,
    pub outcome: Option<OutreachOutcome>,
    pub notes: Option<String>,
    pub occurred_at: Option<String>,
    pub next_followup_date: Option<String>,
}

/// Full prospect view: the row plus everything it owns.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProspectDetail {
    #[serde(flatten)]
    pub prospect: DbProspect,
    pub signals: Vec<DbSignal>,
    pub contacts: Vec<DbContact>,
    pub outreach: Vec<DbOutreach>,
}

/// Result of converting a prospect into a deal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversion {
    pub prospect: DbProspect,
    pub deal: DbDeal,
    /// False when the prospect had already been converted.
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProspectAggregates {
    pub total: i64,
    pub by_tier: Vec<CountBy>,
    pub by_status: Vec<CountBy>,
    pub average_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountBy {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutreachStats {
    pub total: i64,
    pub by_method: Vec<CountBy>,
    pub by_outcome: Vec<CountBy>,
    pub response_rate: f64,
    pub overdue_followups: i64,
    pub upcoming_followups: Vec<DbOutreach>,
}

// ---------------------------------------------------------------------------
// Insights, weights, outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbInsight {
    pub id: String,
    pub insight_type: InsightType,
    pub insight_key: String,
    pub title: String,
    pub hypothesis: String,
    pub confidence: f64,
    pub evidence: serde_json::Value,
    pub sample_size: i64,
    pub priority: InsightPriority,
    pub status: InsightStatus,
    pub superseded_by: Option<String>,
    pub user_feedback: Option<String>,
    pub feedback_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A freshly computed insight, before it is reconciled against the active one.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightDraft {
    pub insight_type: InsightType,
    pub insight_key: String,
    pub title: String,
    pub hypothesis: String,
    pub confidence: f64,
    pub evidence: serde_json::Value,
    pub sample_size: i64,
    pub priority: InsightPriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsightWrite {
    Created,
    Superseded,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbInsightSnapshot {
    pub id: i64,
    pub insight_id: String,
    pub insight_key: String,
    pub confidence: f64,
    pub evidence: serde_json::Value,
    pub sample_size: i64,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbLearnedWeight {
    pub signal_type: String,
    pub default_weight: f64,
    pub learned_weight: f64,
    pub confidence: f64,
    pub sample_size: i64,
    pub last_calibrated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbOutcome {
    pub id: String,
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub outcome: OutcomeKind,
    pub value: Option<f64>,
    pub notes: Option<String>,
    pub occurred_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbLearningRun {
    pub id: i64,
    pub trigger: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub insights_created: i64,
    pub insights_superseded: i64,
    pub weights_calibrated: i64,
}

// ---------------------------------------------------------------------------
// Queries and stats
// ---------------------------------------------------------------------------

/// Input for [`super::PrismDb::save_query`].
#[derive(Debug, Clone)]
pub struct NewQuery {
    pub session_id: Option<String>,
    pub query: String,
    pub intent: String,
    pub answer: String,
    pub sources: serde_json::Value,
    pub follow_ups: serde_json::Value,
    pub visualizations: serde_json::Value,
    pub response_time_ms: i64,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbQuery {
    pub id: String,
    pub session_id: Option<String>,
    pub query: String,
    pub intent: String,
    pub answer: String,
    pub sources: serde_json::Value,
    pub follow_ups: serde_json::Value,
    pub visualizations: serde_json::Value,
    pub response_time_ms: i64,
    pub degraded: bool,
    pub feedback: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub transcripts: i64,
    pub segments: i64,
    pub people: i64,
    pub deals: i64,
    pub prospects: i64,
    pub objections: i64,
    pub active_insights: i64,
    pub queries: i64,
    pub needs_reprocess: i64,
    pub ingest_errors: i64,
    pub knowledge_types: Vec<CountBy>,
    pub deals_by_status: Vec<CountBy>,
    pub prospects_by_tier: Vec<CountBy>,
    pub average_prospect_score: f64,
    pub average_talk_ratio: Option<f64>,
}
