//! Transcript ingestion pipeline.
//!
//! Orchestrates: fingerprint → parse → persist raw → segment → classify →
//! resolve entities → write everything derived in one transaction.
//!
//! The raw transcript is stored before any model call, so a crash mid-run
//! leaves a transcript without segments that `queue::queue_interrupted`
//! hands back to the workers on the next start. Everything derived from it (segments, links, objections,
//! MEDDPICC, metrics, status) lands atomically: readers see the previous
//! state or the new one, never a mix. Model calls happen with no store
//! lock held.

pub mod classifier;
pub mod meddpicc;
pub mod metrics;
pub mod prompts;
pub mod queue;
pub mod segmenter;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::db::{DbError, NewSegment, NewTranscript, SharedDb};
use crate::entity_linker::{commit_deal, commit_person, deals_mentioned_in, EntityLinker, Resolution};
use crate::error::PrismError;
use crate::llm::LlmGateway;
use crate::parser::{self, ParsedTranscript, UNKNOWN_SPEAKER};
use crate::types::{Config, Effectiveness, KnowledgeType, RelationshipType, TranscriptStatus};
use crate::util::{content_hash, normalize_company, normalize_name, truncate_chars};
use classifier::{Classification, Classifier, MentionedPerson};
use prompts::CallContext;
use segmenter::{segment_lines, SegmentCandidate, SegmenterLimits};

const OBJECTION_TEXT_MAX: usize = 200;
const RESPONSE_TEXT_MAX: usize = 500;

const OBJECTION_CATEGORIES: &[(&str, &[&str])] = &[
    ("pricing", &["pricing", "price", "budget", "cost", "expensive"]),
    ("timing", &["timing", "timeline", "next_quarter", "not_now"]),
    ("competition", &["competition", "competitor", "incumbent"]),
    ("authority", &["economic_buyer", "authority", "decision_process"]),
    ("need", &["need", "priority", "pain"]),
];

/// Result of ingesting or reprocessing one transcript.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Segmented, classified and linked. `degraded` means the heuristic
    /// classifier was used and the transcript is queued for reprocessing.
    Processed {
        transcript_id: String,
        segments: usize,
        degraded: bool,
    },
    /// Identical bytes were already ingested.
    SkippedDuplicate { transcript_id: String },
    /// Unreadable or unparseable; recorded as an ingest error.
    Failed { kind: String, message: String },
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub limits: SegmenterLimits,
    pub classify_timeout: std::time::Duration,
    pub user_name: Option<String>,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            limits: SegmenterLimits::from(&config.pipeline),
            classify_timeout: std::time::Duration::from_secs(config.llm.classify_timeout_secs),
            user_name: config.user_name.clone(),
        }
    }
}

/// Entity work planned for one segment, committed in the final transaction.
#[derive(Default)]
struct SegmentPlan {
    people: Vec<(MentionedPerson, Resolution, RelationshipType)>,
    companies: Vec<(String, Resolution)>,
    known_deals: Vec<String>,
}

enum PrimaryDeal {
    Known(String),
    Company(String, Resolution),
    None,
}

pub struct Pipeline {
    db: SharedDb,
    llm: Arc<LlmGateway>,
    classifier: Classifier,
    linker: EntityLinker,
    settings: PipelineSettings,
    shutdown: CancellationToken,
}

impl Pipeline {
    pub fn new(
        db: SharedDb,
        llm: Arc<LlmGateway>,
        settings: PipelineSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            classifier: Classifier::new(llm.clone(), settings.classify_timeout),
            linker: EntityLinker::new(db.clone(), llm.clone(), settings.classify_timeout),
            llm,
            db,
            settings,
            shutdown,
        }
    }

    /// Whether the model can take classification work right now.
    pub async fn llm_ready(&self) -> bool {
        self.llm.health().await.is_ready()
    }

    /// Ingest one file from the watched directory. Failures are recorded
    /// and reported in the outcome rather than returned.
    pub async fn ingest_path(&self, path: &Path) -> IngestOutcome {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => return self.record_failure(path, "READ_ERROR", &e.to_string()),
        };
        match self.ingest_bytes(path, &bytes).await {
            Ok(outcome) => outcome,
            Err(PrismError::Parse(e)) => self.record_failure(path, "PARSE_ERROR", &e.to_string()),
            Err(e) if e.is_cancelled() => IngestOutcome::Failed {
                kind: e.kind().code().to_string(),
                message: "shutdown before processing finished".to_string(),
            },
            Err(e) => self.record_failure(path, e.kind().code(), &e.to_string()),
        }
    }

    pub async fn ingest_bytes(&self, path: &Path, bytes: &[u8]) -> Result<IngestOutcome, PrismError> {
        let hash = content_hash(bytes);
        let existing = self.db.lock().find_transcript_by_hash(&hash)?;
        if let Some(transcript_id) = existing {
            log::debug!("Pipeline: {} already ingested as {}", path.display(), transcript_id);
            return Ok(IngestOutcome::SkippedDuplicate { transcript_id });
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let content = String::from_utf8(bytes.to_vec())
            .map_err(|_| parser::ParseError::Encoding(path.display().to_string()))?;
        let parsed = parser::parse_content(&filename, &content, parser::detect_format(path))?;

        let upserted = self.db.lock().upsert_transcript(&NewTranscript {
            filename: parsed.filename.clone(),
            original_path: path.display().to_string(),
            raw_content: parsed.raw_content.clone(),
            content_hash: hash,
            format: parsed.format,
            duration_minutes: parsed.duration_minutes,
            call_date: parsed.call_date.clone(),
            call_type: parsed.call_type.clone(),
            context: parsed.context.clone(),
            speakers: parsed.speakers.clone(),
        })?;
        if !upserted.was_new {
            return Ok(IngestOutcome::SkippedDuplicate {
                transcript_id: upserted.id,
            });
        }

        log::info!("Pipeline: ingested {} as {}", filename, upserted.id);
        self.process(&upserted.id, &parsed).await
    }

    /// Re-run segmentation and classification from the stored raw content.
    pub async fn reprocess(&self, transcript_id: &str) -> Result<IngestOutcome, PrismError> {
        let (transcript, content) = {
            let db = self.db.lock();
            let transcript = db
                .get_transcript(transcript_id)?
                .ok_or_else(|| PrismError::NotFound(format!("transcript {}", transcript_id)))?;
            let content = db.get_transcript_content(transcript_id)?.unwrap_or_default();
            (transcript, content)
        };
        let parsed = parser::parse_content(&transcript.filename, &content, transcript.format)?;
        self.process(transcript_id, &parsed).await
    }

    fn record_failure(&self, path: &Path, kind: &str, message: &str) -> IngestOutcome {
        log::warn!("Pipeline: {} failed ({}): {}", path.display(), kind, message);
        if let Err(e) = self
            .db
            .lock()
            .record_ingest_error(&path.display().to_string(), kind, message)
        {
            log::error!("Pipeline: could not record ingest error: {}", e);
        }
        IngestOutcome::Failed {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }

    async fn process(
        &self,
        transcript_id: &str,
        parsed: &ParsedTranscript,
    ) -> Result<IngestOutcome, PrismError> {
        let candidates = segment_lines(&parsed.lines, self.settings.limits);
        let user = metrics::user_speaker(&parsed.speakers, self.settings.user_name.as_deref());
        let call = CallContext {
            filename: parsed.filename.clone(),
            call_type: parsed.call_type.clone(),
            context: parsed.context.clone(),
            user_speaker: user.clone(),
        };

        let classified = self
            .classifier
            .classify_all(&candidates, &call, &self.shutdown)
            .await?;
        let primary = self.primary_deal(parsed, &classified.items).await?;
        let plans = self
            .plan_links(&candidates, &classified.items, user.as_deref())
            .await?;

        let segments: Vec<NewSegment> = candidates
            .iter()
            .zip(&classified.items)
            .map(|(candidate, c)| NewSegment {
                position: candidate.position,
                content: candidate.content.clone(),
                speaker: Some(candidate.speaker.clone()),
                start_time: candidate.start_time.clone(),
                end_time: candidate.end_time.clone(),
                knowledge_type: c.knowledge_type,
                summary: c.summary.clone(),
                confidence: c.confidence,
                importance: c.importance.clone(),
                sentiment: c.sentiment.clone(),
                actionable: c.actionable,
                tags: c.tags.iter().map(|t| (t.clone(), c.confidence)).collect(),
            })
            .collect();
        let call_metrics = metrics::compute_metrics(
            transcript_id,
            &parsed.lines,
            &candidates,
            &classified.items,
            user.as_deref(),
        );
        let status = if classified.degraded {
            TranscriptStatus::NeedsReprocess
        } else {
            TranscriptStatus::Processed
        };
        let activity_at = parsed.call_date.clone().unwrap_or_else(|| Utc::now().to_rfc3339());

        self.db.lock().with_transaction(|db| -> Result<(), DbError> {
            let ids = db.replace_segments(transcript_id, &segments)?;
            db.refresh_objection_frequencies()?;

            let primary_id = match &primary {
                PrimaryDeal::Known(id) => Some(id.clone()),
                PrimaryDeal::Company(company, resolution) => Some(commit_deal(db, company, resolution)?),
                PrimaryDeal::None => None,
            };

            let mut touched: BTreeSet<String> = BTreeSet::new();
            for (i, ((segment_id, plan), c)) in ids.iter().zip(&plans).zip(&classified.items).enumerate() {
                for (mention, resolution, relationship) in &plan.people {
                    let person_id = commit_person(db, mention, resolution, *relationship)?;
                    db.link_segment_to_person(segment_id, &person_id)?;
                }

                let mut deal_ids: BTreeSet<String> = plan.known_deals.iter().cloned().collect();
                for (company, resolution) in &plan.companies {
                    deal_ids.insert(commit_deal(db, company, resolution)?);
                }
                if let Some(id) = &primary_id {
                    if c.knowledge_type != KnowledgeType::SmallTalk {
                        deal_ids.insert(id.clone());
                    }
                }
                for deal_id in &deal_ids {
                    db.link_segment_to_deal(segment_id, deal_id)?;
                }

                let content = &candidates[i].content;
                for evidence in meddpicc::evidence_for(content, c) {
                    for deal_id in &deal_ids {
                        db.upgrade_meddpicc(
                            deal_id,
                            evidence.letter,
                            evidence.status,
                            &evidence.evidence,
                            Some(segment_id),
                            evidence.confidence,
                        )?;
                    }
                }
                touched.extend(deal_ids);

                if c.has_tag("objection") {
                    let text = c
                        .summary
                        .clone()
                        .unwrap_or_else(|| truncate_chars(content, OBJECTION_TEXT_MAX));
                    let objection_id = db.upsert_objection(&text, objection_category(c))?;
                    db.link_objection_segment(&objection_id, segment_id)?;

                    // The user's reply right after the objection is how it was handled.
                    if let (Some(next), Some(next_id)) = (candidates.get(i + 1), ids.get(i + 1)) {
                        if user.as_deref() == Some(next.speaker.as_str()) && !next.content.trim().is_empty() {
                            db.add_objection_response(
                                &objection_id,
                                &truncate_chars(&next.content, RESPONSE_TEXT_MAX),
                                Effectiveness::Unknown,
                                Some(next_id),
                            )?;
                        }
                    }
                }
            }

            for deal_id in &touched {
                db.touch_deal_activity(deal_id, &activity_at)?;
            }
            db.upsert_transcript_metrics(&call_metrics)?;
            db.set_transcript_status(transcript_id, status)?;
            Ok(())
        })?;

        log::info!(
            "Pipeline: {} processed, {} segment(s){}",
            transcript_id,
            segments.len(),
            if classified.degraded { ", degraded (queued for reprocess)" } else { "" }
        );
        Ok(IngestOutcome::Processed {
            transcript_id: transcript_id.to_string(),
            segments: segments.len(),
            degraded: classified.degraded,
        })
    }

    /// The deal the call is about: a known company named in the filename or
    /// header context, else the company mentioned most across segments.
    async fn primary_deal(
        &self,
        parsed: &ParsedTranscript,
        items: &[Classification],
    ) -> Result<PrimaryDeal, PrismError> {
        let header = format!(
            "{} {}",
            parsed.filename.replace(['-', '_', '.'], " "),
            parsed.context.as_deref().unwrap_or("")
        );
        let candidates = self.db.lock().deal_candidates()?;
        if let Some(id) = deals_mentioned_in(&header, &candidates).into_iter().next() {
            return Ok(PrimaryDeal::Known(id));
        }

        let mut counts: HashMap<String, (usize, String)> = HashMap::new();
        for c in items.iter().filter(|c| !is_competitive(c)) {
            for company in &c.entities.companies {
                let norm = normalize_company(company);
                if norm.is_empty() {
                    continue;
                }
                counts.entry(norm).or_insert((0, company.trim().to_string())).0 += 1;
            }
        }
        let top = counts
            .into_iter()
            .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then_with(|| b.0.cmp(&a.0)))
            .map(|(_, (_, name))| name);
        match top {
            Some(company) => {
                let resolution = self
                    .linker
                    .resolve_company(&company, parsed.context.as_deref().unwrap_or(""), &self.shutdown)
                    .await?;
                Ok(PrimaryDeal::Company(company, resolution))
            }
            None => Ok(PrimaryDeal::None),
        }
    }

    async fn plan_links(
        &self,
        candidates: &[SegmentCandidate],
        items: &[Classification],
        user: Option<&str>,
    ) -> Result<Vec<SegmentPlan>, PrismError> {
        let deal_candidates = self.db.lock().deal_candidates()?;
        let mut people_cache: HashMap<(String, String), Resolution> = HashMap::new();
        let mut company_cache: HashMap<String, Resolution> = HashMap::new();
        let mut plans = Vec::with_capacity(candidates.len());

        for (candidate, c) in candidates.iter().zip(items) {
            let mut plan = SegmentPlan {
                known_deals: deals_mentioned_in(&candidate.content, &deal_candidates),
                ..Default::default()
            };

            let named = inferred_relationship(c, c.entities.people.len());
            let mut mentions: Vec<(MentionedPerson, RelationshipType)> = c
                .entities
                .people
                .iter()
                .map(|p| (p.clone(), named))
                .collect();
            if candidate.speaker != UNKNOWN_SPEAKER && Some(candidate.speaker.as_str()) != user {
                let speaker = MentionedPerson {
                    name: candidate.speaker.clone(),
                    ..Default::default()
                };
                mentions.push((speaker, RelationshipType::Unknown));
            }
            let mut seen = BTreeSet::new();
            for (mention, relationship) in mentions {
                let name_norm = normalize_name(&mention.name);
                if name_norm.is_empty() || !seen.insert(name_norm.clone()) {
                    continue;
                }
                let key = (
                    name_norm,
                    mention.company.as_deref().map(normalize_company).unwrap_or_default(),
                );
                let resolution = match people_cache.get(&key) {
                    Some(r) => r.clone(),
                    None => {
                        let r = self
                            .linker
                            .resolve_person(&mention, &candidate.content, &self.shutdown)
                            .await?;
                        people_cache.insert(key, r.clone());
                        r
                    }
                };
                plan.people.push((mention, resolution, relationship));
            }

            if !is_competitive(c) {
                for company in &c.entities.companies {
                    let norm = normalize_company(company);
                    if norm.is_empty() || plan.companies.iter().any(|(n, _)| normalize_company(n) == norm) {
                        continue;
                    }
                    let resolution = match company_cache.get(&norm) {
                        Some(r) => r.clone(),
                        None => {
                            let r = self
                                .linker
                                .resolve_company(company, &candidate.content, &self.shutdown)
                                .await?;
                            company_cache.insert(norm, r.clone());
                            r
                        }
                    };
                    plan.companies.push((company.trim().to_string(), resolution));
                }
            }
            plans.push(plan);
        }
        Ok(plans)
    }
}

/// Competitor mentions are not deals.
fn is_competitive(c: &Classification) -> bool {
    c.knowledge_type == KnowledgeType::CompetitiveIntel || c.has_tag("competition")
}

/// Relationship for a newly created person, when the segment singles out
/// exactly one named person in a buying role.
fn inferred_relationship(c: &Classification, named_people: usize) -> RelationshipType {
    if named_people != 1 {
        return RelationshipType::Unknown;
    }
    if c.has_tag("economic_buyer") {
        RelationshipType::EconomicBuyer
    } else if c.has_tag("champion") {
        RelationshipType::Champion
    } else {
        RelationshipType::Unknown
    }
}

fn objection_category(c: &Classification) -> Option<&'static str> {
    OBJECTION_CATEGORIES
        .iter()
        .find(|(_, tags)| tags.iter().any(|t| c.has_tag(t)))
        .map(|(category, _)| *category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::PrismDb;
    use crate::llm::scripted::ScriptedProvider;
    use crate::llm::Health;
    use crate::types::{LlmConfig, MeddpiccLetter, MeddpiccStatus};
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::time::Duration;

    fn pipeline(db: PrismDb, provider: Arc<ScriptedProvider>) -> (Pipeline, SharedDb) {
        let shared: SharedDb = Arc::new(Mutex::new(db));
        let gateway = Arc::new(
            LlmGateway::new(provider, &LlmConfig::default()).with_backoff_base(Duration::from_millis(1)),
        );
        let settings = PipelineSettings::from_config(&Config::default());
        (
            Pipeline::new(shared.clone(), gateway, settings, CancellationToken::new()),
            shared,
        )
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    const CALL: &str = "Me: Thanks for making time today.\n\
                        Sarah Chen: Honestly the pricing is too expensive for us right now.\n\
                        Me: Understood. We can phase the rollout to spread the cost.\n";

    #[tokio::test]
    async fn test_offline_ingest_degrades_and_flags_reprocess() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "2024-03-01-acme-discovery.txt", CALL);
        let (pipeline, db) = pipeline(test_db(), Arc::new(ScriptedProvider::offline()));

        let outcome = pipeline.ingest_path(&path).await;
        let IngestOutcome::Processed { transcript_id, segments, degraded } = outcome else {
            panic!("unexpected outcome: {:?}", outcome);
        };
        assert_eq!(segments, 3);
        assert!(degraded);

        let db = db.lock();
        let transcript = db.get_transcript(&transcript_id).unwrap().unwrap();
        assert_eq!(transcript.status, TranscriptStatus::NeedsReprocess);
        assert!(transcript.needs_reprocess);

        let stored = db.segments_for_transcript(&transcript_id).unwrap();
        assert!(stored.iter().all(|s| s.confidence <= classifier::RULE_MAX_CONFIDENCE));

        // The prospect's objection and the user's reply are captured.
        let objections = db.objections_by_frequency(10).unwrap();
        assert_eq!(objections.len(), 1);
        assert_eq!(objections[0].category.as_deref(), Some("pricing"));
        assert_eq!(objections[0].responses.len(), 1);
        assert!(objections[0].responses[0].response_text.starts_with("Understood."));

        // The other speaker becomes a person; the user does not.
        let people = db.list_people().unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].name, "Sarah Chen");

        let metrics = db.get_transcript_metrics(&transcript_id).unwrap().unwrap();
        assert_eq!(metrics.speaker_count, 2);
        assert!(metrics.talk_ratio.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_bytes_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.txt", CALL);
        let b = write(dir.path(), "b.txt", CALL);
        let (pipeline, db) = pipeline(test_db(), Arc::new(ScriptedProvider::offline()));

        let first = pipeline.ingest_path(&a).await;
        let second = pipeline.ingest_path(&b).await;
        let IngestOutcome::Processed { transcript_id, .. } = first else {
            panic!("first ingest failed");
        };
        match second {
            IngestOutcome::SkippedDuplicate { transcript_id: dup } => assert_eq!(dup, transcript_id),
            other => panic!("expected duplicate, got {:?}", other),
        }
        assert_eq!(db.lock().list_transcripts(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_recorded_as_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x41]).unwrap();
        let (pipeline, db) = pipeline(test_db(), Arc::new(ScriptedProvider::offline()));

        match pipeline.ingest_path(&path).await {
            IngestOutcome::Failed { kind, .. } => assert_eq!(kind, "PARSE_ERROR"),
            other => panic!("expected failure, got {:?}", other),
        }
        let db = db.lock();
        assert!(db.list_transcripts(10).unwrap().is_empty());
        assert_eq!(db.list_ingest_errors(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_file_yields_one_unknown_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "empty.txt", "");
        let (pipeline, db) = pipeline(test_db(), Arc::new(ScriptedProvider::offline()));

        let IngestOutcome::Processed { transcript_id, segments, .. } = pipeline.ingest_path(&path).await else {
            panic!("empty file should still be processed");
        };
        assert_eq!(segments, 1);
        let stored = db.lock().segments_for_transcript(&transcript_id).unwrap();
        assert_eq!(stored[0].speaker.as_deref(), Some(UNKNOWN_SPEAKER));
    }

    #[tokio::test]
    async fn test_llm_classification_links_deal_and_meddpicc() {
        let db = test_db();
        let deal = db
            .create_deal(&crate::db::NewDeal {
                company_name: "Acme Inc".into(),
                ..Default::default()
            })
            .unwrap();

        let provider = Arc::new(ScriptedProvider::new().with_responder(|prompt| {
            if prompt.contains("Known records") {
                return Ok(r#"{"match": null}"#.to_string());
            }
            if prompt.contains("signs off") {
                Ok(r#"{"knowledgeType": "sales_insight", "confidence": 0.9,
                       "summary": "Dana Lee signs off on budget", "tags": ["economic_buyer"],
                       "entities": {"people": [{"name": "Dana Lee", "company": "Acme", "role": "CFO"}],
                                    "companies": ["Acme"]}}"#
                    .to_string())
            } else {
                Ok(r#"{"knowledgeType": "small_talk", "confidence": 0.8}"#.to_string())
            }
        }));
        let (pipeline, shared) = pipeline(db, provider);

        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "acme-call.txt",
            "Me: How was the weekend?\nTom: Good. Dana Lee signs off on anything over 50k.\n",
        );
        let IngestOutcome::Processed { transcript_id, degraded, .. } = pipeline.ingest_path(&path).await else {
            panic!("ingest failed");
        };
        assert!(!degraded);

        let db = shared.lock();
        assert_eq!(
            db.get_transcript(&transcript_id).unwrap().unwrap().status,
            TranscriptStatus::Processed
        );
        let linked = db.segments_for_deal(&deal.id, 10).unwrap();
        assert_eq!(linked.len(), 1);
        assert!(linked[0].content.contains("Dana Lee"));

        let e = db
            .get_deal_meddpicc(&deal.id)
            .unwrap()
            .into_iter()
            .find(|m| m.letter == MeddpiccLetter::E)
            .unwrap();
        assert_eq!(e.status, MeddpiccStatus::Identified);

        let dana = db.find_person("dana lee", "acme").unwrap().unwrap();
        assert_eq!(dana.relationship_type, RelationshipType::EconomicBuyer);
        assert_eq!(dana.role.as_deref(), Some("CFO"));
        assert!(db.get_deal(&deal.id).unwrap().unwrap().last_activity_at.is_some());
    }

    #[tokio::test]
    async fn test_reprocess_when_healthy_replaces_segments() {
        let provider = Arc::new(ScriptedProvider::offline());
        let (pipeline, db) = pipeline(test_db(), provider.clone());
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "call.txt", CALL);
        let IngestOutcome::Processed { transcript_id, .. } = pipeline.ingest_path(&path).await else {
            panic!("ingest failed");
        };
        let before = db.lock().segments_for_transcript(&transcript_id).unwrap();

        provider.set_health(Health {
            running: true,
            model_available: true,
        });
        pipeline.llm.refresh_health().await;
        for _ in 0..3 {
            provider.push_reply(r#"{"knowledgeType": "sales_insight", "confidence": 0.9}"#);
        }

        let outcome = pipeline.reprocess(&transcript_id).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Processed { degraded: false, .. }));

        let db = db.lock();
        let after = db.segments_for_transcript(&transcript_id).unwrap();
        assert_eq!(after.len(), before.len());
        assert!(after.iter().zip(&before).all(|(a, b)| a.confidence >= b.confidence));
        assert!(after.iter().all(|a| before.iter().all(|b| a.id != b.id)));
        let transcript = db.get_transcript(&transcript_id).unwrap().unwrap();
        assert_eq!(transcript.status, TranscriptStatus::Processed);
        assert!(!transcript.needs_reprocess);
        // Objection frequency follows the rewritten segments.
        assert!(db.objections_by_frequency(10).unwrap().iter().all(|o| o.frequency == 0));
    }
}
