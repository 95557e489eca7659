//! Resolve people and company mentions to canonical rows.
//!
//! Resolution order for a mention:
//! 1. Exact match on the normalized identity (name + company for people,
//!    company for deals)
//! 2. A remembered alias from an earlier fuzzy or disambiguated match
//! 3. Jaro-Winkler similarity: one candidate at or above
//!    `AUTO_MATCH_THRESHOLD` is taken as the same entity
//! 4. Several strong candidates, or only near misses: the LLM picks one or
//!    says the mention is new. Without the LLM the strongest candidate
//!    wins if it cleared the auto threshold, otherwise the mention is new
//!
//! Resolution only reads. Rows and aliases are written by the `commit_*`
//! functions, which run inside the pipeline's transaction.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::db::{DbError, DealCandidate, NewDeal, PrismDb, SharedDb};
use crate::error::PrismError;
use crate::llm::{CompletionOptions, LlmGateway};
use crate::processor::classifier::MentionedPerson;
use crate::processor::prompts::disambiguation_prompt;
use crate::types::RelationshipType;
use crate::util::{mentions_phrase, normalize_company, normalize_name};

pub const AUTO_MATCH_THRESHOLD: f64 = 0.92;
/// Below this a candidate is not worth asking about.
pub const CANDIDATE_THRESHOLD: f64 = 0.80;
const MAX_DISAMBIGUATION_CANDIDATES: usize = 5;
/// Company names shorter than this are not scanned for in free text.
const MIN_SCAN_NAME_LEN: usize = 3;

const PERSON_ALIAS: &str = "person";
const DEAL_ALIAS: &str = "deal";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Alias,
    Fuzzy,
    Disambiguated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Existing { id: String, via: MatchKind },
    New,
}

#[derive(Debug, Clone)]
struct Scored {
    id: String,
    label: String,
    score: f64,
}

enum Decision {
    Match(String),
    Ask(Vec<Scored>),
    New,
}

/// Rank candidates by similarity, strongest first. Ties break on id so the
/// outcome does not depend on row order.
fn rank<'a>(needle: &str, candidates: impl Iterator<Item = (&'a str, &'a str, &'a str)>) -> Vec<Scored> {
    let mut scored: Vec<Scored> = candidates
        .map(|(id, label, norm)| Scored {
            id: id.to_string(),
            label: label.to_string(),
            score: strsim::jaro_winkler(needle, norm),
        })
        .filter(|s| s.score >= CANDIDATE_THRESHOLD)
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    scored
}

fn decide(ranked: Vec<Scored>) -> Decision {
    let strong = ranked.iter().filter(|s| s.score >= AUTO_MATCH_THRESHOLD).count();
    match (strong, ranked.is_empty()) {
        (_, true) => Decision::New,
        (1, _) => Decision::Match(ranked[0].id.clone()),
        _ => Decision::Ask(ranked.into_iter().take(MAX_DISAMBIGUATION_CANDIDATES).collect()),
    }
}

pub struct EntityLinker {
    db: SharedDb,
    llm: Arc<LlmGateway>,
    timeout: Duration,
}

impl EntityLinker {
    pub fn new(db: SharedDb, llm: Arc<LlmGateway>, timeout: Duration) -> Self {
        Self { db, llm, timeout }
    }

    pub async fn resolve_person(
        &self,
        mention: &MentionedPerson,
        snippet: &str,
        cancel: &CancellationToken,
    ) -> Result<Resolution, PrismError> {
        let name_norm = normalize_name(&mention.name);
        if name_norm.is_empty() {
            return Ok(Resolution::New);
        }
        let company_norm = mention.company.as_deref().map(normalize_company).unwrap_or_default();

        let ranked = {
            let db = self.db.lock();
            if let Some(person) = db.find_person(&name_norm, &company_norm)? {
                return Ok(Resolution::Existing {
                    id: person.id,
                    via: MatchKind::Exact,
                });
            }
            if let Some(id) = db.find_alias(PERSON_ALIAS, &name_norm, &company_norm)? {
                return Ok(Resolution::Existing {
                    id,
                    via: MatchKind::Alias,
                });
            }
            let candidates = db.person_candidates(Some(&company_norm))?;
            rank(
                &name_norm,
                candidates
                    .iter()
                    .map(|c| (c.id.as_str(), c.name.as_str(), c.name_norm.as_str())),
            )
        };

        self.settle("person", &mention.name, snippet, ranked, cancel).await
    }

    pub async fn resolve_company(
        &self,
        company: &str,
        snippet: &str,
        cancel: &CancellationToken,
    ) -> Result<Resolution, PrismError> {
        let company_norm = normalize_company(company);
        if company_norm.is_empty() {
            return Ok(Resolution::New);
        }

        let ranked = {
            let db = self.db.lock();
            if let Some(deal) = db.find_deal_by_company(&company_norm)? {
                return Ok(Resolution::Existing {
                    id: deal.id,
                    via: MatchKind::Exact,
                });
            }
            if let Some(id) = db.find_alias(DEAL_ALIAS, &company_norm, "")? {
                return Ok(Resolution::Existing {
                    id,
                    via: MatchKind::Alias,
                });
            }
            let candidates = db.deal_candidates()?;
            rank(
                &company_norm,
                candidates
                    .iter()
                    .map(|c| (c.id.as_str(), c.company_name.as_str(), c.company_norm.as_str())),
            )
        };

        self.settle("company", company, snippet, ranked, cancel).await
    }

    async fn settle(
        &self,
        kind: &str,
        mention: &str,
        snippet: &str,
        ranked: Vec<Scored>,
        cancel: &CancellationToken,
    ) -> Result<Resolution, PrismError> {
        let options = match decide(ranked) {
            Decision::New => return Ok(Resolution::New),
            Decision::Match(id) => {
                return Ok(Resolution::Existing {
                    id,
                    via: MatchKind::Fuzzy,
                })
            }
            Decision::Ask(options) => options,
        };

        match self.disambiguate(kind, mention, snippet, &options, cancel).await {
            Ok(Some(id)) => Ok(Resolution::Existing {
                id,
                via: MatchKind::Disambiguated,
            }),
            Ok(None) => Ok(Resolution::New),
            Err(e) if e.is_degradable() => {
                log::debug!("EntityLinker: disambiguation unavailable for '{}': {}", mention, e);
                Ok(options
                    .into_iter()
                    .find(|s| s.score >= AUTO_MATCH_THRESHOLD)
                    .map(|s| Resolution::Existing {
                        id: s.id,
                        via: MatchKind::Fuzzy,
                    })
                    .unwrap_or(Resolution::New))
            }
            Err(e) => Err(e),
        }
    }

    async fn disambiguate(
        &self,
        kind: &str,
        mention: &str,
        snippet: &str,
        options: &[Scored],
        cancel: &CancellationToken,
    ) -> Result<Option<String>, PrismError> {
        let listed: Vec<(String, String)> = options
            .iter()
            .map(|s| (s.id.clone(), s.label.clone()))
            .collect();
        let prompt = disambiguation_prompt(kind, mention, snippet, &listed);
        let opts = CompletionOptions::json(self.timeout)
            .with_max_tokens(64)
            .with_cancel(cancel.clone());
        let value = self.llm.complete_json(&prompt, &opts).await?;

        let chosen = value
            .get("match")
            .or_else(|| value.get("id"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty() && !id.eq_ignore_ascii_case("null"));
        // An id that was not offered is treated as "new".
        Ok(chosen
            .filter(|id| options.iter().any(|s| s.id == *id))
            .map(str::to_string))
    }
}

/// Write the person a resolution points to and return its id. Similarity
/// matches are remembered so the same mention resolves the same way later.
pub fn commit_person(
    db: &PrismDb,
    mention: &MentionedPerson,
    resolution: &Resolution,
    relationship: RelationshipType,
) -> Result<String, DbError> {
    match resolution {
        Resolution::Existing { id, via } => {
            if matches!(via, MatchKind::Fuzzy | MatchKind::Disambiguated) {
                let company_norm = mention.company.as_deref().map(normalize_company).unwrap_or_default();
                db.save_alias(PERSON_ALIAS, &normalize_name(&mention.name), &company_norm, id)?;
            }
            db.enrich_person(id, mention.role.as_deref())?;
            Ok(id.clone())
        }
        Resolution::New => Ok(db
            .create_person(
                &mention.name,
                mention.company.as_deref(),
                mention.role.as_deref(),
                relationship,
            )?
            .id),
    }
}

/// Write the deal a company resolution points to and return its id. New
/// companies open a deal in `prospecting`.
pub fn commit_deal(db: &PrismDb, company: &str, resolution: &Resolution) -> Result<String, DbError> {
    let company_norm = normalize_company(company);
    match resolution {
        Resolution::Existing { id, via } => {
            if matches!(via, MatchKind::Fuzzy | MatchKind::Disambiguated) {
                db.save_alias(DEAL_ALIAS, &company_norm, "", id)?;
            }
            Ok(id.clone())
        }
        Resolution::New => {
            // An earlier segment of the same pass may have created it.
            if let Some(deal) = db.find_deal_by_company(&company_norm)? {
                return Ok(deal.id);
            }
            Ok(db
                .create_deal(&NewDeal {
                    company_name: company.trim().to_string(),
                    ..Default::default()
                })?
                .id)
        }
    }
}

/// Deals whose company name appears verbatim in `text`. Works without the
/// LLM, so degraded runs still link segments to known deals.
pub fn deals_mentioned_in(text: &str, candidates: &[DealCandidate]) -> Vec<String> {
    let haystack = text.to_lowercase();
    let mut ids: Vec<String> = candidates
        .iter()
        .filter(|c| {
            let name = c.company_name.trim().to_lowercase();
            let norm = c.company_norm.as_str();
            (name.chars().count() >= MIN_SCAN_NAME_LEN && mentions_phrase(&haystack, &name))
                || (norm.chars().count() >= MIN_SCAN_NAME_LEN && mentions_phrase(&haystack, norm))
        })
        .map(|c| c.id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::llm::scripted::ScriptedProvider;
    use crate::llm::Health;
    use crate::types::LlmConfig;
    use parking_lot::Mutex;

    fn linker(db: PrismDb, provider: Arc<ScriptedProvider>) -> (EntityLinker, SharedDb) {
        let shared: SharedDb = Arc::new(Mutex::new(db));
        let gateway = Arc::new(LlmGateway::new(provider, &LlmConfig::default()));
        (
            EntityLinker::new(shared.clone(), gateway, Duration::from_secs(5)),
            shared,
        )
    }

    fn mention(name: &str, company: Option<&str>) -> MentionedPerson {
        MentionedPerson {
            name: name.into(),
            company: company.map(str::to_string),
            role: None,
        }
    }

    #[test]
    fn test_similarity_thresholds() {
        assert!(strsim::jaro_winkler("sarah chen", "sara chen") >= AUTO_MATCH_THRESHOLD);
        assert!(strsim::jaro_winkler("sarah chen", "tom baker") < CANDIDATE_THRESHOLD);
    }

    #[tokio::test]
    async fn test_exact_and_fuzzy_matches_skip_the_llm() {
        let db = test_db();
        let existing = db
            .create_person("Sarah Chen", Some("Acme"), None, RelationshipType::Unknown)
            .unwrap();
        let provider = Arc::new(ScriptedProvider::new());
        let (linker, _) = linker(db, provider.clone());
        let cancel = CancellationToken::new();

        let exact = linker
            .resolve_person(&mention("sarah  chen", Some("Acme Inc.")), "", &cancel)
            .await
            .unwrap();
        assert_eq!(
            exact,
            Resolution::Existing {
                id: existing.id.clone(),
                via: MatchKind::Exact
            }
        );

        let fuzzy = linker
            .resolve_person(&mention("Sara Chen", Some("Acme")), "", &cancel)
            .await
            .unwrap();
        assert_eq!(
            fuzzy,
            Resolution::Existing {
                id: existing.id,
                via: MatchKind::Fuzzy
            }
        );
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unrelated_name_is_new() {
        let db = test_db();
        db.create_person("Sarah Chen", Some("Acme"), None, RelationshipType::Unknown)
            .unwrap();
        let (linker, _) = linker(db, Arc::new(ScriptedProvider::new()));
        let resolution = linker
            .resolve_person(&mention("Tom Baker", Some("Acme")), "", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::New);
    }

    #[tokio::test]
    async fn test_near_miss_asks_the_llm_and_alias_sticks() {
        let db = test_db();
        let existing = db
            .create_person("Sarah Chen", Some("Acme"), None, RelationshipType::Unknown)
            .unwrap();
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_reply(format!(r#"{{"match": "{}"}}"#, existing.id));
        let (linker, shared) = linker(db, provider.clone());
        let cancel = CancellationToken::new();

        // "sarah" vs "sarah chen" is a near miss, below the auto threshold.
        let m = mention("Sarah", Some("Acme"));
        let resolution = linker.resolve_person(&m, "Sarah owns the budget", &cancel).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::Existing {
                id: existing.id.clone(),
                via: MatchKind::Disambiguated
            }
        );
        assert_eq!(provider.call_count(), 1);

        let id = commit_person(&shared.lock(), &m, &resolution, RelationshipType::Unknown).unwrap();
        assert_eq!(id, existing.id);

        // Second pass resolves from the alias without another prompt.
        let again = linker.resolve_person(&m, "", &cancel).await.unwrap();
        assert_eq!(
            again,
            Resolution::Existing {
                id: existing.id,
                via: MatchKind::Alias
            }
        );
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_near_miss_without_llm_is_new() {
        let db = test_db();
        db.create_person("Sarah Chen", Some("Acme"), None, RelationshipType::Unknown)
            .unwrap();
        let provider = Arc::new(ScriptedProvider::offline());
        let (linker, shared) = linker(db, provider);
        let m = mention("Sarah", Some("Acme"));
        let resolution = linker
            .resolve_person(&m, "", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::New);

        let id = commit_person(&shared.lock(), &m, &resolution, RelationshipType::Champion).unwrap();
        let person = shared.lock().get_person(&id).unwrap().unwrap();
        assert_eq!(person.name, "Sarah");
        assert_eq!(person.relationship_type, RelationshipType::Champion);
    }

    #[tokio::test]
    async fn test_llm_answer_outside_candidates_is_new() {
        let db = test_db();
        db.create_person("Sarah Chen", Some("Acme"), None, RelationshipType::Unknown)
            .unwrap();
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_reply(r#"{"match": "made-up-id"}"#);
        let (linker, _) = linker(db, provider);
        let resolution = linker
            .resolve_person(&mention("Sarah", Some("Acme")), "", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::New);
    }

    #[tokio::test]
    async fn test_company_resolution_creates_one_deal() {
        let db = test_db();
        let provider = Arc::new(ScriptedProvider::new());
        provider.set_health(Health::default());
        let (linker, shared) = linker(db, provider);
        let cancel = CancellationToken::new();

        let first = linker.resolve_company("Globex Corp", "", &cancel).await.unwrap();
        assert_eq!(first, Resolution::New);
        let a = commit_deal(&shared.lock(), "Globex Corp", &first).unwrap();
        // Same company resolved again in the same pass before a re-read.
        let b = commit_deal(&shared.lock(), "Globex", &Resolution::New).unwrap();
        assert_eq!(a, b);

        let second = linker.resolve_company("GLOBEX", "", &cancel).await.unwrap();
        assert_eq!(
            second,
            Resolution::Existing {
                id: a,
                via: MatchKind::Exact
            }
        );
    }

    #[test]
    fn test_deals_mentioned_in_text() {
        let candidates = vec![
            DealCandidate {
                id: "d1".into(),
                company_name: "Acme Inc".into(),
                company_norm: "acme".into(),
            },
            DealCandidate {
                id: "d2".into(),
                company_name: "IO".into(),
                company_norm: "io".into(),
            },
        ];
        assert_eq!(
            deals_mentioned_in("Follow-up with ACME about the io module", &candidates),
            vec!["d1".to_string()]
        );
        assert!(deals_mentioned_in("acmeville", &candidates).is_empty());
    }
}
