//! Coaching recommendations from recent call metrics.

use serde_json::json;

use crate::db::{DbTranscriptMetrics, InsightDraft};
use crate::types::{InsightPriority, InsightType};

/// Calls looked at for a trend.
pub const TREND_WINDOW: usize = 5;
const MIN_USER_QUESTIONS: f64 = 3.0;

pub const TALK_RATIO_KEY: &str = "coaching.talk_ratio";
pub const QUESTIONS_KEY: &str = "coaching.discovery_questions";

#[derive(Debug, Clone, Copy)]
pub struct TalkBand {
    pub min: f64,
    pub max: f64,
}

/// `recent` is newest first. Nothing is emitted until a full window of calls
/// with a measurable talk ratio exists.
pub fn coaching_insights(recent: &[DbTranscriptMetrics], band: TalkBand) -> Vec<InsightDraft> {
    let window: Vec<&DbTranscriptMetrics> = recent
        .iter()
        .filter(|m| m.talk_ratio.is_some())
        .take(TREND_WINDOW)
        .collect();
    if window.len() < TREND_WINDOW {
        return Vec::new();
    }

    let ratios: Vec<f64> = window.iter().filter_map(|m| m.talk_ratio).collect();
    let average = ratios.iter().sum::<f64>() / ratios.len() as f64;
    let outside = ratios.iter().filter(|r| **r < band.min || **r > band.max).count();
    let transcript_ids: Vec<&str> = window.iter().map(|m| m.transcript_id.as_str()).collect();
    let evidence = json!({
        "ratios": ratios,
        "average": average,
        "targetMin": band.min,
        "targetMax": band.max,
        "callsOutsideBand": outside,
        "transcriptIds": transcript_ids,
    });

    let mut drafts = Vec::new();
    let talk = if average > band.max {
        InsightDraft {
            insight_type: InsightType::Coaching,
            insight_key: TALK_RATIO_KEY.to_string(),
            title: "You are talking more than the buyer".to_string(),
            hypothesis: format!(
                "Across your last {} calls you spoke {:.0}% of the time, above the {:.0}% target. \
                 Ask an open question and let the buyer finish before answering.",
                TREND_WINDOW,
                average * 100.0,
                band.max * 100.0
            ),
            confidence: outside as f64 / TREND_WINDOW as f64,
            evidence,
            sample_size: TREND_WINDOW as i64,
            priority: InsightPriority::High,
        }
    } else if average < band.min {
        InsightDraft {
            insight_type: InsightType::Coaching,
            insight_key: TALK_RATIO_KEY.to_string(),
            title: "You are letting calls drift".to_string(),
            hypothesis: format!(
                "Across your last {} calls you spoke only {:.0}% of the time, below the {:.0}% \
                 target. Summarize what you heard and propose the next step.",
                TREND_WINDOW,
                average * 100.0,
                band.min * 100.0
            ),
            confidence: outside as f64 / TREND_WINDOW as f64,
            evidence,
            sample_size: TREND_WINDOW as i64,
            priority: InsightPriority::High,
        }
    } else {
        InsightDraft {
            insight_type: InsightType::Coaching,
            insight_key: TALK_RATIO_KEY.to_string(),
            title: "Talk time is on target".to_string(),
            hypothesis: format!(
                "Your last {} calls averaged {:.0}% talk time, inside the {:.0}-{:.0}% band.",
                TREND_WINDOW,
                average * 100.0,
                band.min * 100.0,
                band.max * 100.0
            ),
            confidence: (TREND_WINDOW - outside) as f64 / TREND_WINDOW as f64,
            evidence,
            sample_size: TREND_WINDOW as i64,
            priority: InsightPriority::Low,
        }
    };
    drafts.push(talk);

    let questions: Vec<i64> = window.iter().map(|m| m.user_question_count).collect();
    let average_questions = questions.iter().sum::<i64>() as f64 / questions.len() as f64;
    if average_questions < MIN_USER_QUESTIONS {
        drafts.push(InsightDraft {
            insight_type: InsightType::Coaching,
            insight_key: QUESTIONS_KEY.to_string(),
            title: "Ask more discovery questions".to_string(),
            hypothesis: format!(
                "You asked {:.1} questions per call on average over your last {} calls. \
                 Aim for at least {:.0} open-ended questions.",
                average_questions, TREND_WINDOW, MIN_USER_QUESTIONS
            ),
            confidence: 0.6,
            evidence: json!({
                "questionsPerCall": questions,
                "average": average_questions,
            }),
            sample_size: TREND_WINDOW as i64,
            priority: if average_questions < 1.0 {
                InsightPriority::High
            } else {
                InsightPriority::Normal
            },
        });
    }
    drafts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(ratio: f64, questions: i64) -> DbTranscriptMetrics {
        DbTranscriptMetrics {
            transcript_id: uuid::Uuid::new_v4().to_string(),
            talk_ratio: Some(ratio),
            user_words: 0,
            total_words: 0,
            question_count: questions,
            user_question_count: questions,
            speaker_count: 2,
            strong_moments: Vec::new(),
            improvement_areas: Vec::new(),
            computed_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    const BAND: TalkBand = TalkBand { min: 0.35, max: 0.5 };

    #[test]
    fn test_needs_full_window() {
        let recent: Vec<_> = (0..4).map(|_| metrics(0.8, 5)).collect();
        assert!(coaching_insights(&recent, BAND).is_empty());
    }

    #[test]
    fn test_high_talk_ratio_trend_is_high_priority() {
        let recent = vec![
            metrics(0.7, 4),
            metrics(0.65, 4),
            metrics(0.6, 4),
            metrics(0.45, 4),
            metrics(0.7, 4),
        ];
        let drafts = coaching_insights(&recent, BAND);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].insight_key, TALK_RATIO_KEY);
        assert_eq!(drafts[0].priority, InsightPriority::High);
        assert!((drafts[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_in_band_with_few_questions() {
        let recent: Vec<_> = (0..5).map(|_| metrics(0.42, 0)).collect();
        let drafts = coaching_insights(&recent, BAND);
        assert_eq!(drafts[0].priority, InsightPriority::Low);
        assert_eq!(drafts[1].insight_key, QUESTIONS_KEY);
        assert_eq!(drafts[1].priority, InsightPriority::High);
    }
}
