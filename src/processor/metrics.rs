//! Per-call conversation metrics.

use std::collections::HashMap;

use chrono::Utc;

use super::classifier::Classification;
use super::segmenter::SegmentCandidate;
use crate::db::DbTranscriptMetrics;
use crate::parser::{TranscriptLine, UNKNOWN_SPEAKER};

/// Target band for the user's share of words on a discovery call.
const TALK_RATIO_MAX: f64 = 0.5;
const TALK_RATIO_MIN: f64 = 0.3;
const MIN_USER_QUESTIONS: i64 = 3;
const MONOLOGUE_WORDS: usize = 250;
const MAX_STRONG_MOMENTS: usize = 5;

/// Names that mean "the person who recorded the call".
const SELF_LABELS: &[&str] = &["me", "you", "i", "myself"];

/// Pick the speaker that is the user: the configured name, a self label,
/// or else the first named speaker.
pub fn user_speaker(speakers: &[String], configured: Option<&str>) -> Option<String> {
    let named: Vec<&String> = speakers.iter().filter(|s| s.as_str() != UNKNOWN_SPEAKER).collect();
    if let Some(name) = configured.map(str::trim).filter(|n| !n.is_empty()) {
        let wanted = name.to_lowercase();
        if let Some(found) = named.iter().find(|s| {
            let s = s.to_lowercase();
            s == wanted || s.split_whitespace().next() == wanted.split_whitespace().next()
        }) {
            return Some((*found).clone());
        }
    }
    if let Some(found) = named.iter().find(|s| SELF_LABELS.contains(&s.to_lowercase().as_str())) {
        return Some((*found).clone());
    }
    named.first().map(|s| (*s).clone())
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn question_count(text: &str) -> i64 {
    text.matches('?').count() as i64
}

pub fn compute_metrics(
    transcript_id: &str,
    lines: &[TranscriptLine],
    segments: &[SegmentCandidate],
    classifications: &[Classification],
    user: Option<&str>,
) -> DbTranscriptMetrics {
    let mut words_by_speaker: HashMap<&str, usize> = HashMap::new();
    let mut total_questions = 0;
    let mut user_questions = 0;
    for line in lines {
        *words_by_speaker.entry(line.speaker.as_str()).or_default() += word_count(&line.content);
        let q = question_count(&line.content);
        total_questions += q;
        if Some(line.speaker.as_str()) == user {
            user_questions += q;
        }
    }

    let total_words: usize = words_by_speaker.values().sum();
    let user_words = user.and_then(|u| words_by_speaker.get(u)).copied().unwrap_or(0);
    let speaker_count = words_by_speaker
        .keys()
        .filter(|s| **s != UNKNOWN_SPEAKER)
        .count() as i64;
    let talk_ratio = (user.is_some() && speaker_count >= 2 && total_words > 0)
        .then(|| user_words as f64 / total_words as f64);

    let mut improvement_areas = Vec::new();
    if let Some(ratio) = talk_ratio {
        if ratio > TALK_RATIO_MAX {
            improvement_areas.push(format!(
                "You spoke {:.0}% of the time; aim for under {:.0}% on discovery calls",
                ratio * 100.0,
                TALK_RATIO_MAX * 100.0
            ));
        } else if ratio < TALK_RATIO_MIN {
            improvement_areas.push(format!(
                "You spoke only {:.0}% of the time; steer the call with more framing",
                ratio * 100.0
            ));
        }
    }
    if user.is_some() && speaker_count >= 2 && user_questions < MIN_USER_QUESTIONS {
        improvement_areas.push(format!(
            "Asked {} question{}; more open-ended discovery questions would surface pain earlier",
            user_questions,
            if user_questions == 1 { "" } else { "s" }
        ));
    }
    if let Some(longest) = segments
        .iter()
        .filter(|s| Some(s.speaker.as_str()) == user)
        .map(|s| word_count(&s.content))
        .max()
        .filter(|w| *w >= MONOLOGUE_WORDS)
    {
        improvement_areas.push(format!(
            "Longest monologue ran about {} words; check in with the buyer sooner",
            longest
        ));
    }

    let mut strong_moments: Vec<String> = segments
        .iter()
        .zip(classifications)
        .filter(|(_, c)| {
            c.sentiment.as_deref() == Some("positive")
                && matches!(c.importance.as_deref(), Some("high") | Some("medium"))
        })
        .filter_map(|(s, c)| c.summary.clone().or_else(|| Some(s.content.clone())))
        .take(MAX_STRONG_MOMENTS)
        .collect();
    if talk_ratio.is_some_and(|r| (TALK_RATIO_MIN..=TALK_RATIO_MAX).contains(&r)) {
        strong_moments.push("Balanced talk time".to_string());
    }
    if user_questions >= MIN_USER_QUESTIONS * 2 {
        strong_moments.push(format!("Asked {} discovery questions", user_questions));
    }

    DbTranscriptMetrics {
        transcript_id: transcript_id.to_string(),
        talk_ratio,
        user_words: user_words as i64,
        total_words: total_words as i64,
        question_count: total_questions,
        user_question_count: user_questions,
        speaker_count,
        strong_moments,
        improvement_areas,
        computed_at: Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(speaker: &str, content: &str) -> TranscriptLine {
        TranscriptLine {
            speaker: speaker.into(),
            timestamp: None,
            seconds: None,
            content: content.into(),
        }
    }

    #[test]
    fn test_user_speaker_resolution() {
        let speakers = vec!["Sarah Chen".to_string(), "Me".to_string()];
        assert_eq!(user_speaker(&speakers, Some("sarah")), Some("Sarah Chen".into()));
        assert_eq!(user_speaker(&speakers, None), Some("Me".into()));
        let others = vec!["Tom".to_string(), "Ana".to_string()];
        assert_eq!(user_speaker(&others, None), Some("Tom".into()));
        assert_eq!(user_speaker(&[UNKNOWN_SPEAKER.to_string()], None), None);
    }

    #[test]
    fn test_talk_ratio_and_questions() {
        let lines = vec![
            line("Me", "one two three four five six seven eight nine ten?"),
            line("Tom", "a b c d e f g h i j"),
        ];
        let m = compute_metrics("t1", &lines, &[], &[], Some("Me"));
        assert_eq!(m.total_words, 20);
        assert_eq!(m.user_words, 10);
        assert_eq!(m.talk_ratio, Some(0.5));
        assert_eq!(m.user_question_count, 1);
        assert_eq!(m.speaker_count, 2);
        assert!(m.improvement_areas.iter().any(|a| a.starts_with("Asked 1 question;")));
        assert!(m.strong_moments.contains(&"Balanced talk time".to_string()));
    }

    #[test]
    fn test_single_speaker_has_no_ratio() {
        let lines = vec![line("Me", "notes to self")];
        let m = compute_metrics("t1", &lines, &[], &[], Some("Me"));
        assert_eq!(m.talk_ratio, None);
        assert!(m.improvement_areas.is_empty());
    }

    #[test]
    fn test_dominant_speaker_flagged() {
        let lines = vec![
            line("Me", &"word ".repeat(90)),
            line("Tom", &"word ".repeat(10)),
        ];
        let m = compute_metrics("t1", &lines, &[], &[], Some("Me"));
        assert_eq!(m.talk_ratio, Some(0.9));
        assert!(m.improvement_areas[0].starts_with("You spoke 90%"));
    }
}
