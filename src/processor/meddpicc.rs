//! Map classified segments onto MEDDPICC evidence.
//!
//! A letter is suggested by a classifier hint or by one of its tags. Tag
//! evidence is `partial` unless the segment carries the concrete detail the
//! letter asks for: a named person for the buyer and champion, a number for
//! metrics, a named rival for competition.

use super::classifier::Classification;
use crate::types::{MeddpiccLetter, MeddpiccStatus};
use crate::util::truncate_chars;

const LETTER_TAGS: &[(MeddpiccLetter, &[&str])] = &[
    (MeddpiccLetter::M, &["metrics", "roi", "kpi", "success_metrics"]),
    (MeddpiccLetter::E, &["economic_buyer", "budget_owner", "budget_holder"]),
    (MeddpiccLetter::D1, &["decision_criteria", "requirements", "evaluation_criteria"]),
    (MeddpiccLetter::D2, &["decision_process", "approval_process"]),
    (MeddpiccLetter::P, &["paper_process", "procurement", "legal_review", "security_review"]),
    (MeddpiccLetter::I, &["pain", "identify_pain", "pain_point"]),
    (MeddpiccLetter::C1, &["champion"]),
    (MeddpiccLetter::C2, &["competition", "competitor", "competitive"]),
];

#[derive(Debug, Clone, PartialEq)]
pub struct MeddpiccEvidence {
    pub letter: MeddpiccLetter,
    pub status: MeddpiccStatus,
    pub evidence: String,
    pub confidence: f64,
}

/// Evidence a segment contributes, one entry per letter at most.
pub fn evidence_for(content: &str, classification: &Classification) -> Vec<MeddpiccEvidence> {
    let default_evidence = classification
        .summary
        .clone()
        .unwrap_or_else(|| truncate_chars(content, 240));

    let mut out: Vec<MeddpiccEvidence> = Vec::new();
    let mut merge = |candidate: MeddpiccEvidence| match out.iter_mut().find(|e| e.letter == candidate.letter) {
        Some(existing) if candidate.status.rank() > existing.status.rank() => *existing = candidate,
        Some(_) => {}
        None => out.push(candidate),
    };

    for hint in &classification.meddpicc {
        merge(MeddpiccEvidence {
            letter: hint.letter,
            status: hint.status,
            evidence: hint.evidence.clone().unwrap_or_else(|| default_evidence.clone()),
            confidence: classification.confidence,
        });
    }

    for (letter, tags) in LETTER_TAGS {
        if !tags.iter().any(|t| classification.has_tag(t)) {
            continue;
        }
        let status = if is_explicit(*letter, content, classification) {
            MeddpiccStatus::Identified
        } else {
            MeddpiccStatus::Partial
        };
        merge(MeddpiccEvidence {
            letter: *letter,
            status,
            evidence: default_evidence.clone(),
            confidence: classification.confidence,
        });
    }

    out.sort_by_key(|e| MeddpiccLetter::ALL.iter().position(|l| *l == e.letter));
    out
}

fn is_explicit(letter: MeddpiccLetter, content: &str, classification: &Classification) -> bool {
    match letter {
        MeddpiccLetter::E | MeddpiccLetter::C1 => !classification.entities.people.is_empty(),
        MeddpiccLetter::M => content.chars().any(|c| c.is_ascii_digit()),
        MeddpiccLetter::C2 => {
            !classification.entities.companies.is_empty() || !classification.entities.products.is_empty()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::classifier::{
        ClassificationSource, ExtractedEntities, MeddpiccHint, MentionedPerson,
    };
    use crate::types::KnowledgeType;

    fn classification(tags: &[&str]) -> Classification {
        Classification {
            label: "sales_insight".into(),
            knowledge_type: KnowledgeType::SalesInsight,
            confidence: 0.8,
            summary: Some("Budget sits with finance".into()),
            importance: None,
            sentiment: None,
            actionable: false,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            entities: ExtractedEntities::default(),
            meddpicc: Vec::new(),
            source: ClassificationSource::Llm,
        }
    }

    #[test]
    fn test_tag_without_detail_is_partial() {
        let evidence = evidence_for("finance owns the budget", &classification(&["economic_buyer"]));
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].letter, MeddpiccLetter::E);
        assert_eq!(evidence[0].status, MeddpiccStatus::Partial);
        assert_eq!(evidence[0].evidence, "Budget sits with finance");
    }

    #[test]
    fn test_named_buyer_is_identified() {
        let mut c = classification(&["economic_buyer"]);
        c.entities.people.push(MentionedPerson {
            name: "Sarah Chen".into(),
            company: None,
            role: Some("CFO".into()),
        });
        let evidence = evidence_for("Sarah Chen signs off on budget", &c);
        assert_eq!(evidence[0].status, MeddpiccStatus::Identified);
    }

    #[test]
    fn test_hint_and_tag_merge_to_strongest() {
        let mut c = classification(&["metrics", "pain"]);
        c.meddpicc.push(MeddpiccHint {
            letter: MeddpiccLetter::I,
            status: MeddpiccStatus::Identified,
            evidence: Some("Manual reconciliation takes 20 hours a week".into()),
        });
        let evidence = evidence_for("We lose 20 hours a week", &c);
        let letters: Vec<_> = evidence.iter().map(|e| e.letter).collect();
        assert_eq!(letters, vec![MeddpiccLetter::M, MeddpiccLetter::I]);
        assert_eq!(evidence[0].status, MeddpiccStatus::Identified);
        assert_eq!(evidence[1].status, MeddpiccStatus::Identified);
        assert!(evidence[1].evidence.starts_with("Manual reconciliation"));
    }

    #[test]
    fn test_untagged_segment_has_no_evidence() {
        assert!(evidence_for("nice weather", &classification(&["small_talk"])).is_empty());
    }
}
