//! Win-rate correlations.
//!
//! For every feature (a prospect signal type, a segment tag on a deal, a
//! MEDDPICC letter identified on a deal) the effect is
//! `P(won | feature) - P(won)`. Only features seen on enough closed samples
//! with a large enough effect become insights.

use std::collections::{BTreeSet, HashSet};

use serde_json::json;

use super::sample_confidence;
use crate::db::InsightDraft;
use crate::types::{InsightPriority, InsightType};

pub const MIN_SAMPLES: usize = 5;
pub const MIN_EFFECT: f64 = 0.15;
const HIGH_PRIORITY_EFFECT: f64 = 0.3;

/// One closed sample: whether it was won and the features it carried.
#[derive(Debug, Clone)]
pub struct Sample {
    pub won: bool,
    pub features: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    pub feature: String,
    pub sample_size: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub base_rate: f64,
    pub effect: f64,
}

pub fn base_rate(samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().filter(|s| s.won).count() as f64 / samples.len() as f64)
}

/// Win rate of every feature against the base rate, no thresholds applied.
pub fn correlate(samples: &[Sample]) -> Vec<Correlation> {
    let Some(base) = base_rate(samples) else {
        return Vec::new();
    };
    let features: BTreeSet<&String> = samples.iter().flat_map(|s| s.features.iter()).collect();
    features
        .into_iter()
        .map(|feature| {
            let with: Vec<&Sample> = samples.iter().filter(|s| s.features.contains(feature)).collect();
            let wins = with.iter().filter(|s| s.won).count();
            let win_rate = wins as f64 / with.len() as f64;
            Correlation {
                feature: feature.clone(),
                sample_size: with.len(),
                wins,
                win_rate,
                base_rate: base,
                effect: win_rate - base,
            }
        })
        .collect()
}

/// Correlations strong enough to report, as insight drafts keyed by
/// `pattern.<scope>.<feature>`.
pub fn pattern_insights(scope: &str, describe: &str, samples: &[Sample]) -> Vec<InsightDraft> {
    correlate(samples)
        .into_iter()
        .filter(|c| c.sample_size >= MIN_SAMPLES && c.effect.abs() >= MIN_EFFECT)
        .filter_map(|c| {
            let confidence = sample_confidence(c.sample_size)?;
            let direction = if c.effect > 0.0 { "raises" } else { "lowers" };
            Some(InsightDraft {
                insight_type: InsightType::Pattern,
                insight_key: format!("pattern.{}.{}", scope, c.feature),
                title: format!("{} {} {} win rate", describe, c.feature, direction),
                hypothesis: format!(
                    "{} with {} were won {:.0}% of the time against a {:.0}% baseline ({:+.0} points, n={}).",
                    describe,
                    c.feature,
                    c.win_rate * 100.0,
                    c.base_rate * 100.0,
                    c.effect * 100.0,
                    c.sample_size
                ),
                confidence,
                evidence: json!({
                    "feature": c.feature,
                    "winRate": c.win_rate,
                    "baseRate": c.base_rate,
                    "effect": c.effect,
                    "wins": c.wins,
                    "sampleSize": c.sample_size,
                }),
                sample_size: c.sample_size as i64,
                priority: if c.effect.abs() >= HIGH_PRIORITY_EFFECT {
                    InsightPriority::High
                } else {
                    InsightPriority::Normal
                },
            })
        })
        .collect()
}
