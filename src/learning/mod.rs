//! Learner: a batch pass over closed outcomes.
//!
//! Each run synthesizes the ICP from won deals, mines win-rate patterns over
//! prospect signals and deal evidence, derives coaching recommendations from
//! recent call metrics, calibrates signal weights and rescores prospects.
//! Insights are reconciled by key: unchanged evidence keeps the live insight,
//! changed evidence supersedes it.

pub mod calibration;
pub mod coaching;
pub mod icp;
pub mod patterns;

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::db::{CountBy, DbDeal, DbError, DbLearnedWeight, DbLearningRun, InsightDraft, InsightWrite, PrismDb};
use crate::scoring;
use crate::types::{DealStatus, MeddpiccStatus, ProspectStatus};
use patterns::Sample;

const MIN_CONFIDENT_SAMPLES: usize = 3;
const FULL_CONFIDENCE_SAMPLES: usize = 20;
const DEAL_SEGMENT_LIMIT: usize = 500;
/// Feature set on prospects that ever answered outreach.
pub const OUTREACH_RESPONSE_FEATURE: &str = "outreach_response";

/// Confidence for a sample size: suppressed below 3, 0.3 at 3 rising
/// linearly to 1.0 at 20.
pub fn sample_confidence(n: usize) -> Option<f64> {
    if n < MIN_CONFIDENT_SAMPLES {
        return None;
    }
    if n >= FULL_CONFIDENCE_SAMPLES {
        return Some(1.0);
    }
    let span = (FULL_CONFIDENCE_SAMPLES - MIN_CONFIDENT_SAMPLES) as f64;
    Some(0.3 + 0.7 * (n - MIN_CONFIDENT_SAMPLES) as f64 / span)
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningReport {
    pub run_id: i64,
    pub insights_created: usize,
    pub insights_superseded: usize,
    pub insights_unchanged: usize,
    pub weights_calibrated: usize,
    pub prospects_rescored: usize,
    pub closed_deals: usize,
    pub labeled_prospects: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningStatus {
    pub last_run: Option<DbLearningRun>,
    /// Keyed `type:status`.
    pub insights: Vec<CountBy>,
    pub weights: Vec<DbLearnedWeight>,
    pub weights_calibrated: usize,
    pub next_run: Option<String>,
}

/// Labeled prospect samples. A converted prospect is won or lost with its
/// deal; a disqualified prospect is lost. Everything else is still open.
pub fn prospect_samples(db: &PrismDb) -> Result<Vec<Sample>, DbError> {
    let deal_status: HashMap<String, DealStatus> = db
        .closed_deals()?
        .into_iter()
        .map(|d| (d.id, d.status))
        .collect();
    let responded: HashSet<String> = db.prospects_with_response()?.into_iter().collect();
    let mut signals: HashMap<String, HashSet<String>> = HashMap::new();
    for signal in db.all_signals()? {
        signals
            .entry(signal.prospect_id)
            .or_default()
            .insert(signal.signal_type);
    }

    let mut samples = Vec::new();
    for prospect in db.list_prospects(None, None)? {
        let won = match prospect.status {
            ProspectStatus::Disqualified => false,
            _ => match prospect
                .converted_deal_id
                .as_deref()
                .and_then(|id| deal_status.get(id))
            {
                Some(DealStatus::Won) => true,
                Some(DealStatus::Lost) => false,
                _ => continue,
            },
        };
        let mut features = signals.remove(&prospect.id).unwrap_or_default();
        if responded.contains(&prospect.id) {
            features.insert(OUTREACH_RESPONSE_FEATURE.to_string());
        }
        samples.push(Sample { won, features });
    }
    Ok(samples)
}

/// Evidence features of each closed deal: segment tags, knowledge types
/// (`kt:`) and MEDDPICC letters reached `identified` (`meddpicc:`).
pub fn deal_samples(db: &PrismDb, closed: &[DbDeal]) -> Result<Vec<Sample>, DbError> {
    let mut samples = Vec::with_capacity(closed.len());
    for deal in closed {
        let mut features = HashSet::new();
        for segment in db.segments_for_deal(&deal.id, DEAL_SEGMENT_LIMIT)? {
            features.insert(format!("kt:{}", segment.knowledge_type.as_str()));
            for tag in segment.tags {
                features.insert(tag.to_lowercase());
            }
        }
        for entry in db.get_deal_meddpicc(&deal.id)? {
            if entry.status == MeddpiccStatus::Identified {
                features.insert(format!("meddpicc:{}", entry.letter.as_str()));
            }
        }
        samples.push(Sample {
            won: deal.status == DealStatus::Won,
            features,
        });
    }
    Ok(samples)
}

/// One full learning pass, committed as a unit.
pub fn run_analysis(db: &PrismDb, trigger: &str) -> Result<LearningReport, DbError> {
    db.with_transaction(|db| {
        let run_id = db.start_learning_run(trigger)?;
        let mut report = LearningReport {
            run_id,
            ..Default::default()
        };

        let closed = db.closed_deals()?;
        report.closed_deals = closed.len();
        let prospects = prospect_samples(db)?;
        report.labeled_prospects = prospects.len();
        let deals = deal_samples(db, &closed)?;

        let band = coaching::TalkBand {
            min: db.config_f64("target_talk_ratio_min", 0.35),
            max: db.config_f64("target_talk_ratio_max", 0.50),
        };
        let recent = db.recent_transcript_metrics(coaching::TREND_WINDOW * 4)?;

        let mut drafts: Vec<InsightDraft> = Vec::new();
        drafts.extend(icp::synthesize(&closed));
        drafts.extend(patterns::pattern_insights("signal", "Prospects", &prospects));
        drafts.extend(patterns::pattern_insights("deal", "Deals", &deals));
        drafts.extend(coaching::coaching_insights(&recent, band));

        for draft in &drafts {
            match db.reconcile_insight(draft)?.0 {
                InsightWrite::Created => report.insights_created += 1,
                InsightWrite::Superseded => report.insights_superseded += 1,
                InsightWrite::Unchanged => report.insights_unchanged += 1,
            }
        }

        for calibrated in calibration::calibrate(&db.learned_weights()?, &prospects) {
            db.save_learned_weight(
                &calibrated.signal_type,
                calibrated.learned_weight,
                calibrated.confidence,
                calibrated.sample_size as i64,
            )?;
            log::debug!(
                "Learner: {} weight {:.2} -> {:.2} (n={})",
                calibrated.signal_type,
                calibrated.previous_weight,
                calibrated.learned_weight,
                calibrated.sample_size
            );
            report.weights_calibrated += 1;
        }
        report.prospects_rescored = scoring::rescore_all(db)?;

        db.finish_learning_run(
            run_id,
            report.insights_created as i64,
            report.insights_superseded as i64,
            report.weights_calibrated as i64,
        )?;
        log::info!(
            "Learner: {} run finished: {} created, {} superseded, {} unchanged, {} weights calibrated",
            trigger,
            report.insights_created,
            report.insights_superseded,
            report.insights_unchanged,
            report.weights_calibrated
        );
        Ok(report)
    })
}

pub fn learning_status(db: &PrismDb, next_run: Option<String>) -> Result<LearningStatus, DbError> {
    let weights = db.learned_weights()?;
    Ok(LearningStatus {
        last_run: db.last_learning_run()?,
        insights: db.count_by(
            "SELECT insight_type || ':' || status, COUNT(*) FROM insights
             GROUP BY insight_type, status ORDER BY insight_type, status",
        )?,
        weights_calibrated: weights.iter().filter(|w| w.last_calibrated_at.is_some()).count(),
        weights,
        next_run,
    })
}
