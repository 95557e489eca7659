//! Question answering over the store.
//!
//! `ask` routes the question to an intent, pulls that intent's structured
//! evidence into a [`Bundle`], widens free-form and coaching questions with
//! lexical segment matches, then has the [`answer::Answerer`] compose a cited
//! reply. The store lock is only held while the bundle is built.

pub mod answer;
pub mod intent;
pub mod lexical;
pub mod session;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::db::{DbDeal, DbError, DbSegment, NewQuery, PrismDb, SharedDb};
use crate::entity_linker::deals_mentioned_in;
use crate::error::PrismError;
use crate::llm::{CompletionOptions, LlmGateway};
use crate::types::{InsightType, Intent, MeddpiccStatus};
use crate::util::{mentions_phrase, normalize_name, truncate_chars};
use answer::{Answerer, Source, Visualization};
use session::QuerySessions;

const LEXICAL_TOP_K: usize = 8;
const SEGMENTS_PER_ENTITY: usize = 5;
const MAX_TARGETS: usize = 3;
const SNIPPET_CHARS: usize = 300;
const MIN_FIRST_NAME_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Segment,
    Deal,
    Person,
    Objection,
    Insight,
    Transcript,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Segment => "segment",
            ItemType::Deal => "deal",
            ItemType::Person => "person",
            ItemType::Objection => "objection",
            ItemType::Insight => "insight",
            ItemType::Transcript => "transcript",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleItem {
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    pub score: f64,
}

/// Evidence handed from the retriever to the answerer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Bundle {
    pub items: Vec<BundleItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregates: Option<Value>,
    #[serde(skip)]
    pub focus_deal: Option<String>,
    #[serde(skip)]
    pub focus_person: Option<String>,
}

impl Bundle {
    /// Add an item. A repeated id keeps the higher score.
    pub fn push(&mut self, item: BundleItem) {
        match self.items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) if item.score > existing.score => existing.score = item.score,
            Some(_) => {}
            None => self.items.push(item),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|i| i.id == id)
    }

    fn aggregate(&mut self, key: &str, value: Value) {
        let aggregates = self.aggregates.get_or_insert_with(|| json!({}));
        if let Some(map) = aggregates.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    fn sort(&mut self) {
        self.items.sort_by(|a, b| b.score.total_cmp(&a.score));
    }

    fn push_segment(&mut self, segment: &DbSegment, score: f64) {
        let speaker = segment.speaker.as_deref().unwrap_or("Unknown");
        self.push(BundleItem {
            item_type: ItemType::Segment,
            id: segment.id.clone(),
            name: Some(format!("{} ({})", segment.filename, speaker)),
            snippet: Some(truncate_chars(
                segment.summary.as_deref().unwrap_or(&segment.content),
                SNIPPET_CHARS,
            )),
            score,
        });
    }

    fn push_deal(&mut self, deal: &DbDeal, score: f64) {
        let mut snippet = format!(
            "status {}; MEDDPICC {}/8 identified",
            deal.status, deal.meddpicc_identified
        );
        if let Some(amount) = deal.value_amount {
            snippet.push_str(&format!("; value {:.0} {}", amount, deal.value_currency));
        }
        if let Some(close) = &deal.expected_close_date {
            snippet.push_str(&format!("; expected close {}", close));
        }
        if let Some(at) = &deal.last_activity_at {
            snippet.push_str(&format!("; last activity {}", at));
        }
        self.push(BundleItem {
            item_type: ItemType::Deal,
            id: deal.id.clone(),
            name: Some(deal.company_name.clone()),
            snippet: Some(snippet),
            score,
        });
    }
}

/// Descending scores for a ranked list, starting at `top`.
fn rank_score(top: f64, position: usize) -> f64 {
    (top - 0.05 * position as f64).max(0.05)
}

/// People whose full name, or a distinctive first name, appears in the query.
fn people_mentioned_in(db: &PrismDb, query: &str) -> Result<Vec<String>, DbError> {
    let haystack = normalize_name(query);
    let mut ids = Vec::new();
    for person in db.list_people()? {
        let name = normalize_name(&person.name);
        let first = name.split(' ').next().unwrap_or("");
        let matched = (!name.is_empty() && mentions_phrase(&haystack, &name))
            || (first.chars().count() >= MIN_FIRST_NAME_LEN && mentions_phrase(&haystack, first));
        if matched {
            ids.push(person.id);
        }
    }
    Ok(ids)
}

/// Build the evidence bundle for a routed question.
pub fn retrieve(db: &PrismDb, intent: Intent, query: &str) -> Result<Bundle, DbError> {
    let mut bundle = Bundle::default();
    match intent {
        Intent::DealStatus => deal_evidence(db, query, &mut bundle, false)?,
        Intent::MeddpiccGap => deal_evidence(db, query, &mut bundle, true)?,
        Intent::PersonLookup => person_evidence(db, query, &mut bundle)?,
        Intent::ObjectionPattern => objection_evidence(db, query, &mut bundle)?,
        Intent::Coaching => {
            coaching_evidence(db, &mut bundle)?;
            lexical_evidence(db, query, &mut bundle)?;
        }
        Intent::Stats => {
            bundle.aggregate("stats", serde_json::to_value(db.dashboard_stats()?)?);
            bundle.aggregate("prospects", serde_json::to_value(db.prospect_aggregates()?)?);
        }
        Intent::FreeForm => {
            lexical_evidence(db, query, &mut bundle)?;
            for id in deals_mentioned_in(query, &db.deal_candidates()?) {
                if let Some(deal) = db.get_deal(&id)? {
                    bundle.push_deal(&deal, 0.6);
                }
            }
            for id in people_mentioned_in(db, query)? {
                if let Some(person) = db.get_person(&id)? {
                    push_person(&mut bundle, &person, 0.6);
                }
            }
        }
    }
    bundle.sort();
    Ok(bundle)
}

fn deal_evidence(db: &PrismDb, query: &str, bundle: &mut Bundle, gaps: bool) -> Result<(), DbError> {
    let targets = deals_mentioned_in(query, &db.deal_candidates()?);
    let deals: Vec<DbDeal> = if targets.is_empty() {
        let mut open: Vec<DbDeal> = db
            .list_deals(None)?
            .into_iter()
            .filter(|d| !d.status.is_closed())
            .collect();
        if gaps {
            open.sort_by_key(|d| d.meddpicc_identified);
        }
        open.truncate(SEGMENTS_PER_ENTITY);
        open
    } else {
        let mut found = Vec::new();
        for id in targets.iter().take(MAX_TARGETS) {
            if let Some(deal) = db.get_deal(id)? {
                found.push(deal);
            }
        }
        found
    };

    let focused = !targets.is_empty();
    let mut scorecards = serde_json::Map::new();
    for (i, deal) in deals.iter().enumerate() {
        bundle.push_deal(deal, if focused { 1.0 } else { rank_score(0.7, i) });
        let entries = db.get_deal_meddpicc(&deal.id)?;
        let card: Vec<Value> = entries
            .iter()
            .filter(|e| !gaps || e.status != MeddpiccStatus::Identified)
            .map(|e| {
                json!({
                    "letter": e.letter,
                    "label": e.label,
                    "status": e.status,
                    "evidence": e.evidence,
                })
            })
            .collect();
        scorecards.insert(deal.id.clone(), Value::Array(card));

        if focused {
            for (j, segment) in db.segments_for_deal(&deal.id, SEGMENTS_PER_ENTITY)?.iter().enumerate() {
                bundle.push_segment(segment, rank_score(0.9, j));
            }
            let evidence_ids: Vec<&str> = entries
                .iter()
                .filter_map(|e| e.source_segment_id.as_deref())
                .collect();
            for id in evidence_ids {
                if let Some(segment) = db.get_segment(id)? {
                    bundle.push_segment(&segment, 0.85);
                }
            }
        }
    }
    bundle.aggregate(if gaps { "meddpiccGaps" } else { "meddpicc" }, Value::Object(scorecards));
    if focused {
        bundle.focus_deal = deals.first().map(|d| d.id.clone());
    }
    Ok(())
}

fn push_person(bundle: &mut Bundle, person: &crate::db::DbPerson, score: f64) {
    let mut parts = Vec::new();
    if let Some(role) = &person.role {
        parts.push(role.clone());
    }
    if let Some(company) = &person.company {
        parts.push(format!("at {}", company));
    }
    parts.push(format!("relationship {}", person.relationship_type));
    parts.push(format!("mentioned {} time(s)", person.mention_count));
    bundle.push(BundleItem {
        item_type: ItemType::Person,
        id: person.id.clone(),
        name: Some(person.name.clone()),
        snippet: Some(parts.join(", ")),
        score,
    });
}

fn person_evidence(db: &PrismDb, query: &str, bundle: &mut Bundle) -> Result<(), DbError> {
    let mut ids = people_mentioned_in(db, query)?;
    if ids.is_empty() {
        for token in lexical::tokenize(query) {
            if token.chars().count() < MIN_FIRST_NAME_LEN {
                continue;
            }
            for person in db.search_people(&token)? {
                if !ids.contains(&person.id) {
                    ids.push(person.id);
                }
            }
        }
    }

    for id in ids.iter().take(MAX_TARGETS) {
        let Some(person) = db.get_person(id)? else {
            continue;
        };
        push_person(bundle, &person, 1.0);
        for (j, segment) in db.segments_for_person(id, SEGMENTS_PER_ENTITY)?.iter().enumerate() {
            bundle.push_segment(segment, rank_score(0.9, j));
        }
    }
    bundle.focus_person = ids.first().cloned();
    Ok(())
}

fn objection_evidence(db: &PrismDb, query: &str, bundle: &mut Bundle) -> Result<(), DbError> {
    let objections = db.objections_by_frequency(10)?;
    let max_frequency = objections.iter().map(|o| o.frequency).max().unwrap_or(1).max(1) as f64;
    let mut summary = Vec::new();
    for objection in &objections {
        let best = objection.responses.first();
        let mut snippet = format!("raised {} time(s)", objection.frequency);
        if let Some(category) = &objection.category {
            snippet.push_str(&format!(", category {}", category));
        }
        if let Some(response) = best {
            snippet.push_str(&format!(
                "; response ({}): {}",
                response.effectiveness,
                truncate_chars(&response.response_text, 200)
            ));
        }
        bundle.push(BundleItem {
            item_type: ItemType::Objection,
            id: objection.id.clone(),
            name: Some(objection.text.clone()),
            snippet: Some(snippet),
            score: objection.frequency as f64 / max_frequency,
        });
        summary.push(json!({
            "text": objection.text,
            "category": objection.category,
            "frequency": objection.frequency,
            "responses": objection.responses.len(),
        }));
    }
    bundle.aggregate("objections", Value::Array(summary));

    let tagged = db.segments_by_tag("objection", 50)?;
    let ranked = lexical::rank(query, &tagged, SEGMENTS_PER_ENTITY);
    if ranked.is_empty() {
        for (j, segment) in tagged.iter().take(SEGMENTS_PER_ENTITY).enumerate() {
            bundle.push_segment(segment, rank_score(0.6, j));
        }
    } else {
        for (j, (idx, _)) in ranked.iter().enumerate() {
            bundle.push_segment(&tagged[*idx], rank_score(0.8, j));
        }
    }
    Ok(())
}

fn coaching_evidence(db: &PrismDb, bundle: &mut Bundle) -> Result<(), DbError> {
    let band_min = db.config_f64("target_talk_ratio_min", 0.35);
    let band_max = db.config_f64("target_talk_ratio_max", 0.50);
    let recent = db.recent_transcript_metrics(5)?;
    let ratios: Vec<f64> = recent.iter().filter_map(|m| m.talk_ratio).collect();
    let average = (!ratios.is_empty()).then(|| ratios.iter().sum::<f64>() / ratios.len() as f64);

    for (i, metrics) in recent.iter().enumerate() {
        let Some(transcript) = db.get_transcript(&metrics.transcript_id)? else {
            continue;
        };
        let ratio = metrics
            .talk_ratio
            .map(|r| format!("{:.0}%", r * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        let mut snippet = format!(
            "talk ratio {}, {} question(s) asked",
            ratio, metrics.user_question_count
        );
        if let Some(area) = metrics.improvement_areas.first() {
            snippet.push_str(&format!("; {}", area));
        }
        bundle.push(BundleItem {
            item_type: ItemType::Transcript,
            id: transcript.id.clone(),
            name: Some(transcript.filename.clone()),
            snippet: Some(snippet),
            score: rank_score(0.7, i),
        });
    }

    for insight in db.list_insights(true, Some(InsightType::Coaching))? {
        bundle.push(BundleItem {
            item_type: ItemType::Insight,
            id: insight.id.clone(),
            name: Some(insight.title.clone()),
            snippet: Some(truncate_chars(&insight.hypothesis, SNIPPET_CHARS)),
            score: 0.9,
        });
    }

    bundle.aggregate(
        "talkRatio",
        json!({
            "recent": ratios,
            "average": average,
            "targetMin": band_min,
            "targetMax": band_max,
        }),
    );
    Ok(())
}

fn lexical_evidence(db: &PrismDb, query: &str, bundle: &mut Bundle) -> Result<(), DbError> {
    let segments = db.searchable_segments()?;
    let ranked = lexical::rank(query, &segments, LEXICAL_TOP_K);
    let top = ranked.first().map(|(_, s)| *s).unwrap_or(1.0).max(f64::EPSILON);
    for (idx, score) in ranked {
        bundle.push_segment(&segments[idx], 0.8 * score / top);
    }
    Ok(())
}

/// Response body for `POST /api/ask`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub id: String,
    pub answer: String,
    pub sources: Vec<Source>,
    pub follow_up_questions: Vec<String>,
    pub visualizations: Vec<Visualization>,
    pub intent: Intent,
    pub response_time_ms: i64,
    pub degraded: bool,
}

pub struct QueryService {
    db: SharedDb,
    llm: Arc<LlmGateway>,
    sessions: QuerySessions,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl QueryService {
    pub fn new(
        db: SharedDb,
        llm: Arc<LlmGateway>,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            llm,
            sessions: QuerySessions::new(),
            timeout,
            shutdown,
        }
    }

    /// Answer a question. A newer question in the same session cancels this
    /// one, which then returns `Cancelled` and is not recorded.
    pub async fn ask(&self, query: &str, session_id: Option<&str>) -> Result<AskResponse, PrismError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PrismError::invalid("query", "must not be empty"));
        }
        let started = Instant::now();
        let anonymous;
        let session = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s,
            None => {
                anonymous = uuid::Uuid::new_v4().to_string();
                anonymous.as_str()
            }
        };
        let ticket = self.sessions.begin(session, &self.shutdown);
        let result = self.answer(query, session_id, &ticket.token, started).await;
        self.sessions.finish(&ticket);
        if let Err(e) = &result {
            if e.is_cancelled() {
                log::debug!("Retriever: query cancelled");
            }
        }
        result
    }

    async fn answer(
        &self,
        query: &str,
        session_id: Option<&str>,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<AskResponse, PrismError> {
        let options = CompletionOptions::json(self.timeout);
        let (intent, source) = intent::classify_intent(&self.llm, query, &options, cancel).await?;
        log::debug!("Retriever: intent {} via {:?}", intent, source);

        let bundle = retrieve(&self.db.lock(), intent, query)?;
        let answer = Answerer::new(&self.llm, self.timeout)
            .compose(query, intent, &bundle, cancel)
            .await?;
        if cancel.is_cancelled() {
            return Err(PrismError::Cancelled);
        }

        let response_time_ms = started.elapsed().as_millis() as i64;
        let saved = self.db.lock().save_query(&NewQuery {
            session_id: session_id.map(str::to_string),
            query: query.to_string(),
            intent: intent.as_str().to_string(),
            answer: answer.answer.clone(),
            sources: serde_json::to_value(&answer.sources).map_err(DbError::from)?,
            follow_ups: json!(answer.follow_up_questions),
            visualizations: serde_json::to_value(&answer.visualizations).map_err(DbError::from)?,
            response_time_ms,
            degraded: answer.degraded,
        })?;
        log::info!(
            "Retriever: answered {} query in {}ms ({} source(s){})",
            intent,
            response_time_ms,
            answer.sources.len(),
            if answer.degraded { ", degraded" } else { "" }
        );

        Ok(AskResponse {
            id: saved.id,
            answer: answer.answer,
            sources: answer.sources,
            follow_up_questions: answer.follow_up_questions,
            visualizations: answer.visualizations,
            intent,
            response_time_ms,
            degraded: answer.degraded,
        })
    }
}
