//! BM25 ranking over segment text.
//!
//! Scores are computed in memory over the searchable segments; the corpus of
//! one salesperson's calls is small enough that an index would only add
//! write-path cost.

use std::collections::{HashMap, HashSet};

use crate::db::DbSegment;

const K1: f64 = 1.2;
const B: f64 = 0.75;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "did", "do", "does", "for", "from",
    "had", "has", "have", "how", "i", "in", "is", "it", "its", "me", "my", "of", "on", "or",
    "our", "so", "that", "the", "their", "them", "they", "this", "to", "was", "we", "were",
    "what", "when", "where", "which", "who", "why", "will", "with", "you", "your",
];

/// Case-folded alphanumeric tokens, stopwords and single characters dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn document_text(segment: &DbSegment) -> String {
    match &segment.summary {
        Some(summary) => format!("{} {}", segment.content, summary),
        None => segment.content.clone(),
    }
}

/// Top `k` segments for `query` as `(index into segments, score)`, best
/// first. Segments sharing no term with the query are never returned.
pub fn rank(query: &str, segments: &[DbSegment], k: usize) -> Vec<(usize, f64)> {
    let terms: HashSet<String> = tokenize(query).into_iter().collect();
    if terms.is_empty() || segments.is_empty() || k == 0 {
        return Vec::new();
    }

    let docs: Vec<Vec<String>> = segments.iter().map(|s| tokenize(&document_text(s))).collect();
    let n = docs.len() as f64;
    let avg_len = (docs.iter().map(Vec::len).sum::<usize>() as f64 / n).max(1.0);

    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for doc in &docs {
        let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
        for term in unique {
            if terms.contains(term) {
                *doc_freq.entry(term).or_default() += 1;
            }
        }
    }

    let mut scored: Vec<(usize, f64)> = docs
        .iter()
        .enumerate()
        .filter_map(|(i, doc)| {
            let mut tf: HashMap<&str, usize> = HashMap::new();
            for token in doc {
                if terms.contains(token) {
                    *tf.entry(token.as_str()).or_default() += 1;
                }
            }
            if tf.is_empty() {
                return None;
            }
            let len_norm = 1.0 - B + B * doc.len() as f64 / avg_len;
            let score: f64 = tf
                .iter()
                .map(|(term, freq)| {
                    let df = doc_freq.get(term).copied().unwrap_or(0) as f64;
                    let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
                    let freq = *freq as f64;
                    idf * freq * (K1 + 1.0) / (freq + K1 * len_norm)
                })
                .sum();
            Some((i, score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KnowledgeType;

    fn segment(id: &str, content: &str) -> DbSegment {
        DbSegment {
            id: id.into(),
            transcript_id: "t1".into(),
            position: 0,
            content: content.into(),
            speaker: None,
            start_time: None,
            end_time: None,
            knowledge_type: KnowledgeType::SalesInsight,
            summary: None,
            confidence: 0.8,
            importance: None,
            sentiment: None,
            actionable: false,
            tags: Vec::new(),
            filename: "call.txt".into(),
            call_date: None,
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_tokenize_drops_stopwords_and_case() {
        assert_eq!(tokenize("What is the Pricing for SSO?"), vec!["pricing", "sso"]);
    }

    #[test]
    fn test_rank_prefers_rarer_and_denser_terms() {
        let segments = vec![
            segment("a", "We talked about the weather and the weekend."),
            segment("b", "Pricing came up: pricing is too high for the pilot."),
            segment("c", "The pilot timeline is tight."),
        ];
        let ranked = rank("pricing pilot", &segments, 5);
        let ids: Vec<&str> = ranked.iter().map(|(i, _)| segments[*i].id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(ranked[0].1 > ranked[1].1);
    }

    #[test]
    fn test_rank_empty_query_returns_nothing() {
        let segments = vec![segment("a", "anything at all")];
        assert!(rank("the and of", &segments, 5).is_empty());
    }

    #[test]
    fn test_summary_is_searchable() {
        let mut s = segment("a", "They hesitated.");
        s.summary = Some("Security review blocks procurement".into());
        let ranked = rank("security review", &[s], 3);
        assert_eq!(ranked.len(), 1);
    }
}
