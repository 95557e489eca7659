//! Turn parsed transcript lines into retrieval-sized segments.
//!
//! Adjacent lines from one speaker are merged until the soft token budget is
//! reached. A segment never crosses a speaker change or a silence longer
//! than the configured gap, and never exceeds the hard budget: oversized
//! turns are split at sentence boundaries, and a single oversized sentence
//! is split on word boundaries.

use crate::parser::{TranscriptLine, UNKNOWN_SPEAKER};
use crate::types::PipelineConfig;
use crate::util::estimate_tokens;

/// A segment before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentCandidate {
    pub position: i64,
    pub speaker: String,
    pub content: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SegmenterLimits {
    pub soft_tokens: usize,
    pub hard_tokens: usize,
    pub gap_seconds: u32,
}

impl From<&PipelineConfig> for SegmenterLimits {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            soft_tokens: config.soft_token_cap.max(1),
            hard_tokens: config.hard_token_cap.max(config.soft_token_cap).max(1),
            gap_seconds: config.gap_seconds,
        }
    }
}

impl Default for SegmenterLimits {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

struct Builder {
    speaker: String,
    parts: Vec<String>,
    tokens: usize,
    start_time: Option<String>,
    end_time: Option<String>,
    last_seconds: Option<u32>,
}

impl Builder {
    fn new(line: &TranscriptLine) -> Self {
        Self {
            speaker: line.speaker.clone(),
            parts: Vec::new(),
            tokens: 0,
            start_time: line.timestamp.clone(),
            end_time: line.timestamp.clone(),
            last_seconds: line.seconds,
        }
    }

    fn push(&mut self, text: &str) {
        self.tokens += estimate_tokens(text);
        self.parts.push(text.to_string());
    }

    fn finish(self, out: &mut Vec<SegmentCandidate>) {
        if self.parts.is_empty() {
            return;
        }
        out.push(SegmentCandidate {
            position: out.len() as i64,
            speaker: self.speaker,
            content: self.parts.join(" "),
            start_time: self.start_time,
            end_time: self.end_time,
        });
    }
}

/// Segment a transcript. A transcript with no usable text still yields one
/// segment so it is never silently dropped.
pub fn segment_lines(lines: &[TranscriptLine], limits: SegmenterLimits) -> Vec<SegmentCandidate> {
    let mut out = Vec::new();
    let mut current: Option<Builder> = None;

    for line in lines {
        if line.content.trim().is_empty() {
            continue;
        }

        let continues = current.as_ref().is_some_and(|b| {
            b.speaker == line.speaker && !gap_exceeded(b.last_seconds, line.seconds, limits.gap_seconds)
        });
        if !continues {
            if let Some(done) = current.take() {
                done.finish(&mut out);
            }
        }
        let builder = current.get_or_insert_with(|| Builder::new(line));
        if line.timestamp.is_some() {
            builder.end_time = line.timestamp.clone();
        }
        if line.seconds.is_some() {
            builder.last_seconds = line.seconds;
        }

        for piece in sentence_pieces(&line.content, limits.hard_tokens) {
            let piece_tokens = estimate_tokens(&piece);
            if builder.tokens > 0 && builder.tokens + piece_tokens > limits.soft_tokens {
                let mut next = Builder::new(line);
                next.start_time = builder.end_time.clone();
                next.end_time = builder.end_time.clone();
                next.last_seconds = builder.last_seconds;
                std::mem::replace(builder, next).finish(&mut out);
            }
            builder.push(&piece);
        }
    }

    if let Some(done) = current.take() {
        done.finish(&mut out);
    }

    if out.is_empty() {
        let speaker = lines
            .first()
            .map(|l| l.speaker.clone())
            .unwrap_or_else(|| UNKNOWN_SPEAKER.to_string());
        let content = lines
            .iter()
            .map(|l| l.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        out.push(SegmentCandidate {
            position: 0,
            speaker,
            content,
            start_time: None,
            end_time: None,
        });
    }
    out
}

fn gap_exceeded(previous: Option<u32>, next: Option<u32>, gap_seconds: u32) -> bool {
    match (previous, next) {
        (Some(a), Some(b)) => b.saturating_sub(a) > gap_seconds,
        _ => false,
    }
}

/// Sentences of `text`, each within `hard_tokens`.
fn sentence_pieces(text: &str, hard_tokens: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    for sentence in split_sentences(text) {
        if estimate_tokens(&sentence) <= hard_tokens {
            pieces.push(sentence);
        } else {
            pieces.extend(split_words(&sentence, hard_tokens));
        }
    }
    pieces
}

/// Split after `.`, `!` or `?` when followed by whitespace.
pub(crate) fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|n| n.is_whitespace()) {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

fn split_words(sentence: &str, hard_tokens: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let candidate_len = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if !current.is_empty() && candidate_len.div_ceil(4) > hard_tokens {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(speaker: &str, seconds: Option<u32>, content: &str) -> TranscriptLine {
        TranscriptLine {
            speaker: speaker.to_string(),
            timestamp: seconds.map(|s| format!("{}:{:02}", s / 60, s % 60)),
            seconds,
            content: content.to_string(),
        }
    }

    fn limits(soft: usize, hard: usize) -> SegmenterLimits {
        SegmenterLimits {
            soft_tokens: soft,
            hard_tokens: hard,
            gap_seconds: 60,
        }
    }

    #[test]
    fn test_same_speaker_lines_are_merged() {
        let lines = vec![
            line("Sarah", Some(0), "Thanks for joining."),
            line("Sarah", Some(5), "Let me share my screen."),
            line("Tom", Some(10), "Sounds good."),
        ];
        let segments = segment_lines(&lines, SegmenterLimits::default());
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].speaker, "Sarah");
        assert_eq!(segments[0].content, "Thanks for joining. Let me share my screen.");
        assert_eq!(segments[0].start_time.as_deref(), Some("0:00"));
        assert_eq!(segments[0].end_time.as_deref(), Some("0:05"));
        assert_eq!(segments[1].position, 1);
    }

    #[test]
    fn test_long_silence_splits_a_turn() {
        let lines = vec![
            line("Sarah", Some(0), "First thought."),
            line("Sarah", Some(200), "Much later thought."),
        ];
        let segments = segment_lines(&lines, SegmenterLimits::default());
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn test_soft_cap_splits_at_sentence_boundary() {
        // Each sentence is ~5 tokens; soft cap 12 fits two per segment.
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota. Kappa lambda mu.";
        let segments = segment_lines(&[line("Tom", None, text)], limits(12, 40));
        assert!(segments.len() >= 2);
        for s in &segments {
            assert!(s.content.ends_with('.'));
            assert!(estimate_tokens(&s.content) <= 40);
        }
        let rejoined: Vec<&str> = segments.iter().map(|s| s.content.as_str()).collect();
        assert_eq!(rejoined.join(" "), text);
    }

    #[test]
    fn test_hard_cap_splits_oversized_sentence() {
        let sentence = "word ".repeat(400);
        let segments = segment_lines(&[line("Tom", None, sentence.trim())], limits(50, 100));
        assert!(segments.len() > 1);
        assert!(segments.iter().all(|s| estimate_tokens(&s.content) <= 100));
    }

    #[test]
    fn test_empty_transcript_yields_one_segment() {
        let segments = segment_lines(&[line(UNKNOWN_SPEAKER, None, "   ")], SegmenterLimits::default());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].speaker, UNKNOWN_SPEAKER);
        assert_eq!(segments[0].content.trim(), "");

        let none = segment_lines(&[], SegmenterLimits::default());
        assert_eq!(none.len(), 1);
    }

    #[test]
    fn test_split_sentences_ignores_decimal_points() {
        assert_eq!(
            split_sentences("Is it 3.5 million? Yes. Great!"),
            vec!["Is it 3.5 million?", "Yes.", "Great!"]
        );
    }
}
