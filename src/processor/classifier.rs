//! Segment classification.
//!
//! The LLM path classifies small sets one prompt per segment and larger
//! sets with indexed batch prompts. When the model is unavailable or keeps
//! returning malformed output, a keyword and speaker heuristic takes over
//! and the transcript is flagged for reprocessing. Heuristic results never
//! claim more than `RULE_MAX_CONFIDENCE`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::prompts::{batch_classification_prompt, classification_prompt, CallContext};
use super::segmenter::{split_sentences, SegmentCandidate};
use crate::error::PrismError;
use crate::llm::{CompletionOptions, LlmGateway};
use crate::types::{KnowledgeType, MeddpiccLetter, MeddpiccStatus};
use crate::util::{estimate_tokens, mentions_phrase, truncate_chars};

/// Candidates at or below this count are classified one prompt each.
const SINGLE_PROMPT_LIMIT: usize = 3;
const BATCH_MAX_ITEMS: usize = 8;
const BATCH_MAX_TOKENS: usize = 3000;
pub const RULE_MAX_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Llm,
    Rules,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MentionedPerson {
    pub name: String,
    pub company: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedEntities {
    pub people: Vec<MentionedPerson>,
    pub companies: Vec<String>,
    pub products: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeddpiccHint {
    pub letter: MeddpiccLetter,
    pub status: MeddpiccStatus,
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Label as returned by the classifier, before folding into `knowledge_type`.
    pub label: String,
    pub knowledge_type: KnowledgeType,
    pub confidence: f64,
    pub summary: Option<String>,
    pub importance: Option<String>,
    pub sentiment: Option<String>,
    pub actionable: bool,
    pub tags: Vec<String>,
    pub entities: ExtractedEntities,
    pub meddpicc: Vec<MeddpiccHint>,
    pub source: ClassificationSource,
}

impl Classification {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    fn add_tag(&mut self, tag: &str) {
        let tag = normalize_tag(tag);
        if !tag.is_empty() && !self.has_tag(&tag) {
            self.tags.push(tag);
        }
    }
}

/// Outcome for every candidate of a transcript, in candidate order.
#[derive(Debug, Clone)]
pub struct ClassifiedSegments {
    pub items: Vec<Classification>,
    /// At least one item fell back to the heuristic.
    pub degraded: bool,
}

pub struct Classifier {
    llm: Arc<LlmGateway>,
    timeout: Duration,
}

impl Classifier {
    pub fn new(llm: Arc<LlmGateway>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Classify every candidate. Only cancellation is an error; model
    /// failures degrade to the heuristic.
    pub async fn classify_all(
        &self,
        candidates: &[SegmentCandidate],
        call: &CallContext,
        cancel: &CancellationToken,
    ) -> Result<ClassifiedSegments, PrismError> {
        let mut results: Vec<Option<Classification>> = vec![None; candidates.len()];
        let mut degraded = false;

        if candidates.len() <= SINGLE_PROMPT_LIMIT {
            for (i, candidate) in candidates.iter().enumerate() {
                match self.classify_one(candidate, call, cancel).await {
                    Ok(c) => results[i] = Some(c),
                    Err(e) if e.is_degradable() => {
                        log::warn!("Classifier: falling back to rules: {}", e);
                        degraded = true;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        } else {
            for range in batch_ranges(candidates) {
                let batch = &candidates[range.clone()];
                match self.classify_batch(batch, call, cancel).await {
                    Ok(mut by_index) => {
                        for (offset, i) in range.clone().enumerate() {
                            if let Some(c) = by_index.remove(&offset) {
                                results[i] = Some(c);
                            }
                        }
                    }
                    Err(e) if e.is_degradable() => {
                        log::warn!("Classifier: batch failed, falling back to rules: {}", e);
                        degraded = true;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }

            // Items the batch answer skipped get their own prompt.
            if !degraded {
                for (i, candidate) in candidates.iter().enumerate() {
                    if results[i].is_some() {
                        continue;
                    }
                    match self.classify_one(candidate, call, cancel).await {
                        Ok(c) => results[i] = Some(c),
                        Err(e) if e.is_degradable() => {
                            degraded = true;
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        let items = results
            .into_iter()
            .zip(candidates)
            .map(|(result, candidate)| {
                result.unwrap_or_else(|| classify_with_rules(candidate, call.user_speaker.as_deref()))
            })
            .collect();
        Ok(ClassifiedSegments { items, degraded })
    }

    async fn classify_one(
        &self,
        candidate: &SegmentCandidate,
        call: &CallContext,
        cancel: &CancellationToken,
    ) -> Result<Classification, PrismError> {
        let options = CompletionOptions::json(self.timeout).with_cancel(cancel.clone());
        let value = self
            .llm
            .complete_json(&classification_prompt(candidate, call), &options)
            .await?;
        let item = match &value {
            Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
            other => other.clone(),
        };
        classification_from_value(&item).ok_or_else(|| PrismError::LlmMalformed {
            message: "classification object missing knowledgeType".to_string(),
            raw: value.to_string(),
        })
    }

    async fn classify_batch(
        &self,
        batch: &[SegmentCandidate],
        call: &CallContext,
        cancel: &CancellationToken,
    ) -> Result<HashMap<usize, Classification>, PrismError> {
        let options = CompletionOptions::json(self.timeout).with_cancel(cancel.clone());
        let value = self
            .llm
            .complete_json(&batch_classification_prompt(batch, call), &options)
            .await?;
        let items = match &value {
            Value::Array(items) => items.clone(),
            Value::Object(map) => map
                .get("items")
                .or_else(|| map.get("segments"))
                .or_else(|| map.get("results"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        let mut by_index = HashMap::new();
        for (position, item) in items.iter().enumerate() {
            let index = item
                .get("index")
                .and_then(Value::as_u64)
                .map(|i| i as usize)
                .unwrap_or(position);
            if index >= batch.len() {
                continue;
            }
            if let Some(c) = classification_from_value(item) {
                by_index.entry(index).or_insert(c);
            }
        }
        if by_index.is_empty() {
            return Err(PrismError::LlmMalformed {
                message: "batch answer contained no usable items".to_string(),
                raw: value.to_string(),
            });
        }
        if by_index.len() < batch.len() {
            log::debug!(
                "Classifier: batch answered {}/{} items",
                by_index.len(),
                batch.len()
            );
        }
        Ok(by_index)
    }
}

/// Split candidates into batches bounded by item count and prompt size.
fn batch_ranges(candidates: &[SegmentCandidate]) -> Vec<std::ops::Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut tokens = 0;
    for (i, candidate) in candidates.iter().enumerate() {
        let t = estimate_tokens(&candidate.content);
        if i > start && (i - start >= BATCH_MAX_ITEMS || tokens + t > BATCH_MAX_TOKENS) {
            ranges.push(start..i);
            start = i;
            tokens = 0;
        }
        tokens += t;
    }
    if start < candidates.len() {
        ranges.push(start..candidates.len());
    }
    ranges
}

fn normalize_tag(tag: &str) -> String {
    tag.trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
        .trim_matches('_')
        .to_string()
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find_map(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Object(_) => string_field(v, &["name"]),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Lenient read of one classification object. Returns `None` when no
/// label is present at all.
pub fn classification_from_value(value: &Value) -> Option<Classification> {
    let label = string_field(value, &["knowledgeType", "knowledge_type", "type", "label"])?;
    let (knowledge_type, extra_tag) = KnowledgeType::from_classifier_label(&label);

    let confidence = match value.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.5),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.5),
        _ => 0.5,
    }
    .clamp(0.0, 1.0);

    let actionable = match value.get("actionable") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };

    let entities_value = value.get("entities");
    let people = entities_value
        .and_then(|e| e.get("people"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|p| match p {
                    Value::String(name) => Some(MentionedPerson {
                        name: name.trim().to_string(),
                        ..Default::default()
                    }),
                    Value::Object(_) => string_field(p, &["name"]).map(|name| MentionedPerson {
                        name,
                        company: string_field(p, &["company", "organization"]),
                        role: string_field(p, &["role", "title"]),
                    }),
                    _ => None,
                })
                .filter(|p| !p.name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let meddpicc = value
        .get("meddpicc")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|h| {
                    let letter = MeddpiccLetter::parse(&string_field(h, &["letter"])?.to_uppercase())?;
                    let status = string_field(h, &["status"])
                        .and_then(|s| MeddpiccStatus::parse(&s.to_lowercase()))
                        .filter(|s| *s != MeddpiccStatus::Unknown)
                        .unwrap_or(MeddpiccStatus::Partial);
                    Some(MeddpiccHint {
                        letter,
                        status,
                        evidence: string_field(h, &["evidence"]),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let mut classification = Classification {
        label: label.to_lowercase(),
        knowledge_type,
        confidence,
        summary: string_field(value, &["summary"]).map(|s| truncate_chars(&s, 300)),
        importance: string_field(value, &["importance"]).map(|s| s.to_lowercase()),
        sentiment: string_field(value, &["sentiment"]).map(|s| s.to_lowercase()),
        actionable,
        tags: Vec::new(),
        entities: ExtractedEntities {
            people,
            companies: string_list(entities_value.and_then(|e| e.get("companies"))),
            products: string_list(entities_value.and_then(|e| e.get("products"))),
        },
        meddpicc,
        source: ClassificationSource::Llm,
    };
    for tag in string_list(value.get("tags")) {
        classification.add_tag(&tag);
    }
    if let Some(tag) = extra_tag {
        classification.add_tag(tag);
    }
    Some(classification)
}

// ---------------------------------------------------------------------------
// Heuristic fallback
// ---------------------------------------------------------------------------

const TYPE_KEYWORDS: &[(KnowledgeType, &[&str])] = &[
    (
        KnowledgeType::CompetitiveIntel,
        &["competitor", "competitors", "competition", "incumbent", "switch from", "alternative", "versus", "vs"],
    ),
    (
        KnowledgeType::SalesInsight,
        &["price", "pricing", "budget", "cost", "expensive", "discount", "contract", "renewal", "roi", "procurement", "sign off", "deal"],
    ),
    (
        KnowledgeType::ProductKnowledge,
        &["feature", "features", "integration", "integrations", "api", "dashboard", "roadmap", "platform", "supports", "product"],
    ),
    (
        KnowledgeType::ProcessKnowledge,
        &["process", "workflow", "onboarding", "implementation", "timeline", "approval", "steps", "rollout"],
    ),
    (
        KnowledgeType::PeopleContext,
        &["reports to", "my boss", "manager", "director", "vp", "hired", "joined", "team lead", "headcount"],
    ),
    (
        KnowledgeType::AdviceReceived,
        &["you should", "i recommend", "i'd recommend", "my advice", "suggest", "tip"],
    ),
    (
        KnowledgeType::DecisionRationale,
        &["because", "decided", "the reason", "chose", "went with", "we picked"],
    ),
    (
        KnowledgeType::SmallTalk,
        &["weather", "weekend", "vacation", "holiday", "how are you", "good morning", "kids", "coffee"],
    ),
];

const TAG_KEYWORDS: &[(&str, &[&str])] = &[
    ("pricing", &["price", "pricing", "expensive", "cost", "discount"]),
    ("economic_buyer", &["budget holder", "budget owner", "sign off", "signs off", "final say", "cfo", "approves the budget", "economic buyer"]),
    ("champion", &["champion", "internal advocate", "sell this internally"]),
    ("metrics", &["roi", "kpi", "per month", "per year", "percent", "%", "hours a week", "save"]),
    ("decision_criteria", &["criteria", "requirements", "must have", "evaluate", "evaluation"]),
    ("decision_process", &["decision process", "committee", "next step", "timeline", "by end of quarter"]),
    ("paper_process", &["procurement", "legal", "security review", "contract", "msa", "redlines", "purchase order"]),
    ("pain", &["pain", "struggle", "struggling", "frustrated", "frustrating", "manual", "broken", "problem", "challenge"]),
    ("competition", &["competitor", "competition", "incumbent", "alternative", "versus"]),
    ("next_steps", &["follow up", "next step", "send over", "schedule", "action item"]),
];

const OBJECTION_MARKERS: &[&str] = &[
    "too expensive",
    "concern",
    "concerned",
    "worried",
    "not sure",
    "don't think",
    "can't",
    "won't",
    "not a priority",
    "no budget",
    "already use",
    "hesitant",
];

const POSITIVE_WORDS: &[&str] = &["great", "love", "excited", "perfect", "excellent", "awesome", "helpful", "impressed"];
const NEGATIVE_WORDS: &[&str] = &["problem", "concern", "worried", "frustrated", "expensive", "difficult", "unhappy", "issue"];
const ACTION_MARKERS: &[&str] = &["follow up", "send", "next step", "will do", "action item", "schedule", "by friday", "by monday"];

fn hits(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| mentions_phrase(text, k)).count()
}

/// Deterministic classification used when the model cannot be reached.
pub fn classify_with_rules(candidate: &SegmentCandidate, user_speaker: Option<&str>) -> Classification {
    let text = candidate.content.to_lowercase();
    let from_user = user_speaker.is_some_and(|u| u.eq_ignore_ascii_case(&candidate.speaker));
    let is_question = candidate.content.trim_end().ends_with('?');

    let (mut knowledge_type, best) = TYPE_KEYWORDS
        .iter()
        .map(|(kt, words)| (*kt, hits(&text, words)))
        .fold((KnowledgeType::Unknown, 0), |acc, (kt, n)| if n > acc.1 { (kt, n) } else { acc });

    let objection = !from_user && hits(&text, OBJECTION_MARKERS) > 0;
    let mut label = knowledge_type.as_str().to_string();
    if objection {
        label = "objection".to_string();
        knowledge_type = KnowledgeType::SalesInsight;
    } else if best == 0 && is_question {
        label = "question".to_string();
        knowledge_type = KnowledgeType::ProcessKnowledge;
    }

    let matched = best.max(usize::from(objection));
    let confidence = if matched == 0 {
        0.1
    } else {
        (0.15 + 0.05 * matched as f64).min(RULE_MAX_CONFIDENCE)
    };

    let positive = hits(&text, POSITIVE_WORDS);
    let negative = hits(&text, NEGATIVE_WORDS);
    let sentiment = match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => "positive",
        std::cmp::Ordering::Less => "negative",
        std::cmp::Ordering::Equal => "neutral",
    };

    let summary = split_sentences(&candidate.content)
        .into_iter()
        .next()
        .map(|s| truncate_chars(&s, 160));

    let mut classification = Classification {
        label,
        knowledge_type,
        confidence,
        summary,
        importance: Some("medium".to_string()),
        sentiment: Some(sentiment.to_string()),
        actionable: hits(&text, ACTION_MARKERS) > 0,
        tags: Vec::new(),
        entities: ExtractedEntities::default(),
        meddpicc: Vec::new(),
        source: ClassificationSource::Rules,
    };
    for (tag, words) in TAG_KEYWORDS {
        if hits(&text, words) > 0 {
            classification.add_tag(tag);
        }
    }
    if objection {
        classification.add_tag("objection");
    }
    if is_question {
        classification.add_tag(if from_user { "discovery_question" } else { "question" });
    }
    classification
}
