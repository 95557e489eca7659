//! Prospect scoring.
//!
//! A prospect's score is the sum of its signals' effective weights, clamped
//! to 0..=100. The effective weight of a signal is the learned weight for
//! its type when one exists, else the weight recorded on the signal. Tier
//! follows from the configured thresholds.

use std::collections::HashMap;

use serde::Serialize;

use crate::db::{DbError, DbSignal, PrismDb};
use crate::types::tier_for_score;

pub const DEFAULT_TIER1_THRESHOLD: f64 = 70.0;
pub const DEFAULT_TIER2_THRESHOLD: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProspectScore {
    pub score: f64,
    pub tier: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct TierThresholds {
    pub tier1: f64,
    pub tier2: f64,
}

impl TierThresholds {
    pub fn from_db(db: &PrismDb) -> Self {
        Self {
            tier1: db.config_f64("tier1_threshold", DEFAULT_TIER1_THRESHOLD),
            tier2: db.config_f64("tier2_threshold", DEFAULT_TIER2_THRESHOLD),
        }
    }
}

pub fn compute_score(
    signals: &[DbSignal],
    learned: &HashMap<String, f64>,
    thresholds: TierThresholds,
) -> ProspectScore {
    let total: f64 = signals
        .iter()
        .map(|s| learned.get(&s.signal_type).copied().unwrap_or(s.weight))
        .sum();
    let score = total.clamp(0.0, 100.0);
    ProspectScore {
        score,
        tier: tier_for_score(score, thresholds.tier1, thresholds.tier2),
    }
}

/// Recompute and persist one prospect's score.
pub fn rescore_prospect(db: &PrismDb, prospect_id: &str) -> Result<ProspectScore, DbError> {
    let learned = db.learned_weight_map()?;
    let result = compute_score(
        &db.signals_for_prospect(prospect_id)?,
        &learned,
        TierThresholds::from_db(db),
    );
    db.set_prospect_score(prospect_id, result.score, result.tier)?;
    Ok(result)
}

/// Recompute every prospect, e.g. after weights were recalibrated.
/// Returns how many scores changed.
pub fn rescore_all(db: &PrismDb) -> Result<usize, DbError> {
    db.with_transaction(|db| {
        let learned = db.learned_weight_map()?;
        let thresholds = TierThresholds::from_db(db);
        let mut changed = 0;
        for prospect in db.list_prospects(None, None)? {
            let result = compute_score(&db.signals_for_prospect(&prospect.id)?, &learned, thresholds);
            if (result.score - prospect.score).abs() > f64::EPSILON || result.tier != prospect.tier {
                db.set_prospect_score(&prospect.id, result.score, result.tier)?;
                changed += 1;
            }
        }
        log::info!("ScoreEngine: rescored prospects, {} changed", changed);
        Ok(changed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::NewProspect;

    fn prospect(db: &PrismDb) -> String {
        db.create_prospect(&NewProspect {
            company_name: "Initech".into(),
            ..Default::default()
        })
        .unwrap()
        .id
    }

    #[test]
    fn test_default_weights_sum_and_tier() {
        let db = test_db();
        let id = prospect(&db);
        db.add_signal(&id, "recent_funding", 20.0, None, None).unwrap();
        db.add_signal(&id, "hiring_signals", 15.0, None, None).unwrap();
        db.add_signal(&id, "tech_stack_fit", 10.0, None, None).unwrap();
        let score = rescore_prospect(&db, &id).unwrap();
        assert_eq!(score, ProspectScore { score: 45.0, tier: 2 });

        db.add_signal(&id, "inbound_signal", 25.0, None, None).unwrap();
        let score = rescore_prospect(&db, &id).unwrap();
        assert_eq!(score, ProspectScore { score: 70.0, tier: 1 });
        let stored = db.get_prospect(&id).unwrap().unwrap();
        assert_eq!((stored.score, stored.tier), (70.0, 1));
    }

    #[test]
    fn test_learned_weight_overrides_signal_weight() {
        let db = test_db();
        let id = prospect(&db);
        db.add_signal(&id, "recent_funding", 20.0, None, None).unwrap();
        db.save_learned_weight("recent_funding", 32.0, 0.5, 10).unwrap();
        assert_eq!(rescore_prospect(&db, &id).unwrap().score, 32.0);
    }

    #[test]
    fn test_unknown_signal_type_uses_its_own_weight_and_clamps() {
        let learned = HashMap::new();
        let signal = |t: &str, w: f64| DbSignal {
            id: t.into(),
            prospect_id: "p".into(),
            signal_type: t.into(),
            weight: w,
            description: None,
            source: None,
            detected_at: "2026-01-01T00:00:00Z".into(),
        };
        let thresholds = TierThresholds { tier1: 70.0, tier2: 40.0 };
        let high = compute_score(&[signal("a", 80.0), signal("b", 50.0)], &learned, thresholds);
        assert_eq!(high, ProspectScore { score: 100.0, tier: 1 });
        let low = compute_score(&[signal("c", -15.0)], &learned, thresholds);
        assert_eq!(low, ProspectScore { score: 0.0, tier: 3 });
    }

    #[test]
    fn test_rescore_all_counts_changes() {
        let db = test_db();
        let id = prospect(&db);
        db.add_signal(&id, "referral", 20.0, None, None).unwrap();
        assert_eq!(rescore_all(&db).unwrap(), 1);
        assert_eq!(rescore_all(&db).unwrap(), 0);
    }
}
