//! Signal weight calibration.
//!
//! Each signal type's weight drifts toward
//! `default * P(won | signal) / P(won)`, bounded to a band around the
//! default, moving a fifth of the way per run.

use super::patterns::{base_rate, Sample};
use super::sample_confidence;
use crate::db::DbLearnedWeight;

const LEARNING_RATE: f64 = 0.2;
const MIN_FACTOR: f64 = 0.3;
const MAX_FACTOR: f64 = 2.5;

#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub signal_type: String,
    pub previous_weight: f64,
    pub learned_weight: f64,
    pub confidence: f64,
    pub sample_size: usize,
}

pub fn calibrate(weights: &[DbLearnedWeight], samples: &[Sample]) -> Vec<Calibration> {
    let Some(base) = base_rate(samples).filter(|b| *b > 0.0) else {
        return Vec::new();
    };
    weights
        .iter()
        .filter_map(|weight| {
            let with: Vec<&Sample> = samples
                .iter()
                .filter(|s| s.features.contains(&weight.signal_type))
                .collect();
            let confidence = sample_confidence(with.len())?;
            let win_rate = with.iter().filter(|s| s.won).count() as f64 / with.len() as f64;
            let default = weight.default_weight;
            let target = (default * win_rate / base).clamp(default * MIN_FACTOR, default * MAX_FACTOR);
            let learned = weight.learned_weight * (1.0 - LEARNING_RATE) + target * LEARNING_RATE;
            Some(Calibration {
                signal_type: weight.signal_type.clone(),
                previous_weight: weight.learned_weight,
                learned_weight: (learned * 100.0).round() / 100.0,
                confidence,
                sample_size: with.len(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weight(signal_type: &str, default: f64) -> DbLearnedWeight {
        DbLearnedWeight {
            signal_type: signal_type.into(),
            default_weight: default,
            learned_weight: default,
            confidence: 0.0,
            sample_size: 0,
            last_calibrated_at: None,
        }
    }

    fn sample(won: bool, features: &[&str]) -> Sample {
        Sample {
            won,
            features: features.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn test_predictive_signal_gains_weight() {
        // referral wins 3/3 against a 50% base rate: target 40, step 20 -> 24.
        let samples = vec![
            sample(true, &["referral"]),
            sample(true, &["referral"]),
            sample(true, &["referral"]),
            sample(false, &[]),
            sample(false, &[]),
            sample(false, &[]),
        ];
        let out = calibrate(&[weight("referral", 20.0)], &samples);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].learned_weight, 24.0);
        assert_eq!(out[0].sample_size, 3);
    }

    #[test]
    fn test_losing_signal_is_floored() {
        // website_visit never wins: target clamps to 0.3 * 5 = 1.5, 4.0 + 0.3 = 4.3.
        let samples = vec![
            sample(false, &["website_visit"]),
            sample(false, &["website_visit"]),
            sample(false, &["website_visit"]),
            sample(true, &[]),
        ];
        let out = calibrate(&[weight("website_visit", 5.0)], &samples);
        assert_eq!(out[0].learned_weight, 4.3);
    }

    #[test]
    fn test_skips_thin_evidence_and_zero_base_rate() {
        let thin = vec![sample(true, &["referral"]), sample(false, &["referral"])];
        assert!(calibrate(&[weight("referral", 20.0)], &thin).is_empty());

        let all_lost = vec![sample(false, &["referral"]); 4];
        assert!(calibrate(&[weight("referral", 20.0)], &all_lost).is_empty());
    }
}
