//! Transcript parser.
//!
//! Turns a plain-text, markdown, or structured JSON transcript into a
//! normalized record: speakers, timestamped lines, and advisory metadata
//! (call date, call type, duration) taken from frontmatter, JSON metadata,
//! or the filename.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::types::TranscriptFormat;

/// Speaker label used when no speaker can be detected.
pub const UNKNOWN_SPEAKER: &str = "Unknown";

/// A leading speaker token must be shorter than this.
const MAX_SPEAKER_LEN: usize = 30;

const CALL_TYPE_KEYWORDS: &[(&str, &str)] = &[
    ("discovery", "discovery"),
    ("demo", "demo"),
    ("negotiation", "negotiation"),
    ("follow-up", "follow_up"),
    ("followup", "follow_up"),
    ("follow_up", "follow_up"),
    ("kickoff", "kickoff"),
    ("qbr", "qbr"),
    ("check-in", "check_in"),
    ("checkin", "check_in"),
    ("intro", "intro"),
    ("onboarding", "onboarding"),
    ("renewal", "renewal"),
    ("pricing", "pricing"),
];

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not valid UTF-8 text")]
    Encoding(String),

    #[error("Invalid JSON transcript: {0}")]
    Json(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptLine {
    pub speaker: String,
    pub timestamp: Option<String>,
    /// `timestamp` in seconds from the start of the call.
    pub seconds: Option<u32>,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ParsedTranscript {
    pub filename: String,
    pub format: TranscriptFormat,
    pub raw_content: String,
    pub duration_minutes: Option<f64>,
    pub call_date: Option<String>,
    pub call_type: Option<String>,
    pub context: Option<String>,
    /// Distinct detected speakers in order of first appearance.
    pub speakers: Vec<String>,
    pub lines: Vec<TranscriptLine>,
}

/// Formats the watcher accepts. Anything else is ignored.
pub fn accepted_format(path: &Path) -> Option<TranscriptFormat> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "txt" => Some(TranscriptFormat::Plain),
        "md" | "markdown" => Some(TranscriptFormat::Markdown),
        "json" => Some(TranscriptFormat::Json),
        _ => None,
    }
}

/// Format by extension, falling back to plain text.
pub fn detect_format(path: &Path) -> TranscriptFormat {
    accepted_format(path).unwrap_or(TranscriptFormat::Plain)
}

pub fn parse_file(path: &Path) -> Result<ParsedTranscript, ParseError> {
    let bytes = fs::read(path).map_err(|source| ParseError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let content = String::from_utf8(bytes)
        .map_err(|_| ParseError::Encoding(path.display().to_string()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    parse_content(&filename, &content, detect_format(path))
}

/// Parse already-loaded content. Used for fresh files and for reprocessing
/// stored raw content.
pub fn parse_content(
    filename: &str,
    content: &str,
    format: TranscriptFormat,
) -> Result<ParsedTranscript, ParseError> {
    let hints = filename_hints(filename);
    let mut parsed = match format {
        TranscriptFormat::Json => parse_json(content)?,
        TranscriptFormat::Markdown => parse_markdown(content),
        TranscriptFormat::Plain => parse_plain(content),
    };

    parsed.filename = filename.to_string();
    parsed.format = format;
    parsed.raw_content = content.to_string();
    parsed.call_date = parsed.call_date.or(hints.call_date);
    parsed.call_type = parsed.call_type.or(hints.call_type);
    parsed.context = parsed.context.or(hints.context);
    if parsed.duration_minutes.is_none() {
        parsed.duration_minutes = duration_from_lines(&parsed.lines);
    }
    parsed.speakers = distinct_speakers(&parsed.lines);
    Ok(parsed)
}

fn empty_record() -> ParsedTranscript {
    ParsedTranscript {
        filename: String::new(),
        format: TranscriptFormat::Plain,
        raw_content: String::new(),
        duration_minutes: None,
        call_date: None,
        call_type: None,
        context: None,
        speakers: Vec::new(),
        lines: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Plain text
// ---------------------------------------------------------------------------

fn re_inline_speaker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // [00:01:23] Name: text | Name [1:23]: text | Name (00:01): text | 0:05 Name: text
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:[\[(]?(?P<ts1>\d{1,2}:\d{2}(?::\d{2})?)[\])]?\s+)?(?P<speaker>[^:\[\]()]+?)\s*(?:[\[(](?P<ts2>\d{1,2}:\d{2}(?::\d{2})?)[\])])?\s*:(?:\s+(?P<text>.*))?$",
        )
        .unwrap()
    })
}

fn re_header_speaker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "Sarah Chen  0:03" on its own line, text follows below.
    RE.get_or_init(|| {
        Regex::new(r"^(?P<speaker>\S.*?)\s+[\[(]?(?P<ts>\d{1,2}:\d{2}(?::\d{2})?)[\])]?$").unwrap()
    })
}

const NAME_PARTICLES: &[&str] = &["de", "da", "del", "der", "van", "von", "la", "le", "bin"];

/// Something that reads like a name: a few capitalized words (or numbers,
/// as in `Speaker 2`), no sentence punctuation.
fn looks_like_speaker(candidate: &str) -> bool {
    let candidate = candidate.trim();
    if candidate.is_empty() || candidate.chars().count() >= MAX_SPEAKER_LEN {
        return false;
    }
    if !candidate.chars().next().is_some_and(|c| c.is_uppercase()) {
        return false;
    }
    let words: Vec<&str> = candidate.split_whitespace().collect();
    if words.len() > 4 {
        return false;
    }
    let capitalized = words.iter().all(|w| {
        w.chars()
            .next()
            .is_some_and(|c| c.is_uppercase() || c.is_ascii_digit())
            || NAME_PARTICLES.contains(w)
    });
    if !capitalized {
        return false;
    }
    let lower = candidate.to_lowercase();
    if lower.starts_with("http") || lower.starts_with("www") {
        return false;
    }
    candidate
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '\'' | '-' | '_'))
}

/// A line that opens a new speaker turn. The header form is tried first so
/// that `Name  0:03` is not read as speaker `Name  0` saying `03`.
fn match_speaker_line(line: &str) -> Option<TranscriptLine> {
    if let Some(caps) = re_header_speaker().captures(line) {
        let speaker = caps.name("speaker").map(|m| m.as_str().trim()).unwrap_or("");
        if looks_like_speaker(speaker) {
            let timestamp = caps.name("ts").map(|m| m.as_str().to_string());
            return Some(TranscriptLine {
                speaker: speaker.to_string(),
                seconds: timestamp.as_deref().and_then(timestamp_seconds),
                timestamp,
                content: String::new(),
            });
        }
    }
    if let Some(caps) = re_inline_speaker().captures(line) {
        let speaker = caps.name("speaker").map(|m| m.as_str().trim()).unwrap_or("");
        if looks_like_speaker(speaker) {
            let timestamp = caps
                .name("ts1")
                .or_else(|| caps.name("ts2"))
                .map(|m| m.as_str().to_string());
            return Some(TranscriptLine {
                speaker: speaker.to_string(),
                seconds: timestamp.as_deref().and_then(timestamp_seconds),
                timestamp,
                content: caps
                    .name("text")
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default(),
            });
        }
    }
    None
}

/// Line-by-line state machine. Speaker lines open a turn; unattributed lines
/// append to the current turn. Text before the first speaker, or the whole
/// file when no speaker is found, becomes an `Unknown` turn.
fn parse_plain(content: &str) -> ParsedTranscript {
    let mut record = empty_record();
    let mut lines: Vec<TranscriptLine> = Vec::new();
    let mut preamble: Vec<&str> = Vec::new();

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(turn) = match_speaker_line(line) {
            lines.push(turn);
            continue;
        }
        match lines.last_mut() {
            Some(current) => append_text(&mut current.content, line),
            None => preamble.push(line),
        }
    }

    lines.retain(|l| !l.content.trim().is_empty());
    if lines.is_empty() {
        // No speakers: the whole file, untouched, is one block.
        record.lines.push(TranscriptLine {
            speaker: UNKNOWN_SPEAKER.to_string(),
            timestamp: None,
            seconds: None,
            content: content.to_string(),
        });
        return record;
    }

    if !preamble.is_empty() {
        lines.insert(
            0,
            TranscriptLine {
                speaker: UNKNOWN_SPEAKER.to_string(),
                timestamp: None,
                seconds: None,
                content: preamble.join(" "),
            },
        );
    }
    record.lines = lines;
    record
}

fn append_text(target: &mut String, text: &str) {
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(text);
}

// ---------------------------------------------------------------------------
// Markdown
// ---------------------------------------------------------------------------

/// Markdown transcripts: optional YAML-style frontmatter, a title heading
/// used as context, and speaker turns written with or without emphasis
/// (`**Name:** text`, `- Name: text`).
fn parse_markdown(content: &str) -> ParsedTranscript {
    let mut body = String::with_capacity(content.len());
    let mut frontmatter: Vec<(String, String)> = Vec::new();
    let mut in_frontmatter = false;
    let mut title: Option<String> = None;

    for (i, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line == "---" && (i == 0 || in_frontmatter) {
            in_frontmatter = !in_frontmatter;
            continue;
        }
        if in_frontmatter {
            if let Some((key, value)) = line.split_once(':') {
                frontmatter.push((
                    key.trim().to_lowercase(),
                    value.trim().trim_matches('"').to_string(),
                ));
            }
            continue;
        }
        if let Some(heading) = line.strip_prefix('#') {
            if title.is_none() {
                title = Some(heading.trim_start_matches('#').trim().to_string());
            }
            continue;
        }
        let cleaned = line
            .trim_start_matches(['-', '*', '>'])
            .trim_start()
            .replace("**", "")
            .replace("__", "");
        body.push_str(&cleaned);
        body.push('\n');
    }

    let mut record = parse_plain(&body);
    for (key, value) in frontmatter {
        match key.as_str() {
            "date" | "call_date" => record.call_date = normalize_date(&value),
            "type" | "call_type" => record.call_type = Some(value),
            "duration" | "duration_minutes" => record.duration_minutes = parse_minutes(&value),
            "context" | "title" | "company" => record.context = Some(value),
            _ => {}
        }
    }
    if record.context.is_none() {
        record.context = title.filter(|t| !t.is_empty());
    }
    record
}

// ---------------------------------------------------------------------------
// Structured JSON
// ---------------------------------------------------------------------------

/// Two shapes are accepted: `{transcript, metadata}` where `transcript` is
/// text or a list of turns, and `{segments|lines: [...]}` (a bare list of
/// turns also works).
fn parse_json(content: &str) -> Result<ParsedTranscript, ParseError> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| ParseError::Json(e.to_string()))?;

    let mut record = match &value {
        Value::Array(items) => turns_record(items)?,
        Value::Object(map) => {
            if let Some(transcript) = map.get("transcript") {
                match transcript {
                    Value::String(text) => parse_plain(text),
                    Value::Array(items) => turns_record(items)?,
                    _ => return Err(ParseError::Json("`transcript` must be text or a list".into())),
                }
            } else if let Some(Value::Array(items)) = map.get("segments").or_else(|| map.get("lines")) {
                turns_record(items)?
            } else {
                return Err(ParseError::Json(
                    "expected `transcript`, `segments`, or `lines`".into(),
                ));
            }
        }
        _ => return Err(ParseError::Json("expected an object or a list".into())),
    };

    let metadata = value.get("metadata").unwrap_or(&value);
    record.call_date = str_field(metadata, &["date", "call_date", "callDate"]).and_then(|d| normalize_date(&d));
    record.call_type = str_field(metadata, &["call_type", "callType", "type"]);
    record.context = str_field(metadata, &["context", "title", "company"]);
    record.duration_minutes = metadata
        .get("duration_minutes")
        .or_else(|| metadata.get("durationMinutes"))
        .or_else(|| metadata.get("duration"))
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_minutes(s),
            _ => None,
        });
    Ok(record)
}

fn turns_record(items: &[Value]) -> Result<ParsedTranscript, ParseError> {
    let mut record = empty_record();
    for (i, item) in items.iter().enumerate() {
        let content = str_field(item, &["content", "text"])
            .ok_or_else(|| ParseError::Json(format!("turn {} has no `content` or `text`", i)))?;
        let speaker = str_field(item, &["speaker", "name"])
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_SPEAKER.to_string());
        let (timestamp, seconds) = match item.get("timestamp").or_else(|| item.get("start_time")) {
            Some(Value::String(ts)) => (Some(ts.clone()), timestamp_seconds(ts)),
            Some(Value::Number(n)) => {
                let secs = n.as_f64().map(|s| s.max(0.0) as u32);
                (secs.map(format_seconds), secs)
            }
            _ => (None, None),
        };
        record.lines.push(TranscriptLine {
            speaker: speaker.trim().to_string(),
            timestamp,
            seconds,
            content: content.trim().to_string(),
        });
    }
    Ok(record)
}

fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Metadata helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Default, PartialEq)]
pub struct FilenameHints {
    pub call_date: Option<String>,
    pub call_type: Option<String>,
    pub context: Option<String>,
}

fn re_filename_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})[-_.](\d{2})[-_.](\d{2})").unwrap())
}

/// Advisory metadata from a filename such as `2026-03-01 Acme discovery.txt`.
pub fn filename_hints(filename: &str) -> FilenameHints {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut hints = FilenameHints::default();

    let mut remainder = stem.clone();
    if let Some(caps) = re_filename_date().captures(&stem) {
        hints.call_date = normalize_date(&format!("{}-{}-{}", &caps[1], &caps[2], &caps[3]));
        remainder = stem.replace(&caps[0], " ");
    }

    let lower = stem.to_lowercase();
    hints.call_type = CALL_TYPE_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, label)| label.to_string());

    let context = remainder
        .split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !context.is_empty() {
        hints.context = Some(context);
    }
    hints
}

/// `YYYY-MM-DD` if the value starts with a real calendar date.
fn normalize_date(value: &str) -> Option<String> {
    let head: String = value.trim().chars().take(10).collect();
    NaiveDate::parse_from_str(&head, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Minutes from `45`, `45 min`, or `0:45:00`.
fn parse_minutes(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.contains(':') {
        return timestamp_seconds(value).map(|s| round1(s as f64 / 60.0));
    }
    let digits: String = value
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse::<f64>().ok().filter(|m| m.is_finite())
}

/// Seconds for `M:SS`, `H:MM:SS`. `None` when malformed or out of range.
pub fn timestamp_seconds(ts: &str) -> Option<u32> {
    let parts: Vec<u32> = ts
        .trim()
        .split(':')
        .map(|p| p.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [m, s] if *s < 60 => m.checked_mul(60)?.checked_add(*s),
        [h, m, s] if *m < 60 && *s < 60 => h
            .checked_mul(3600)?
            .checked_add(m * 60 + s),
        _ => None,
    }
}

fn format_seconds(total: u32) -> String {
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn duration_from_lines(lines: &[TranscriptLine]) -> Option<f64> {
    let last = lines.iter().filter_map(|l| l.seconds).max()?;
    if last == 0 {
        return None;
    }
    Some(round1(last as f64 / 60.0))
}

fn distinct_speakers(lines: &[TranscriptLine]) -> Vec<String> {
    let mut seen = HashSet::new();
    lines
        .iter()
        .filter(|l| l.speaker != UNKNOWN_SPEAKER)
        .filter(|l| seen.insert(l.speaker.to_lowercase()))
        .map(|l| l.speaker.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_speaker_turns_and_continuations() {
        let text = "Sarah Chen: Thanks for joining.\nWe have thirty minutes.\n\nMe: Great, let's start.\n";
        let parsed = parse_content("call.txt", text, TranscriptFormat::Plain).unwrap();
        assert_eq!(parsed.speakers, vec!["Sarah Chen", "Me"]);
        assert_eq!(parsed.lines.len(), 2);
        assert_eq!(parsed.lines[0].content, "Thanks for joining. We have thirty minutes.");
        assert_eq!(parsed.raw_content, text);
    }

    #[test]
    fn test_timestamps_in_several_positions() {
        let text = "[00:00:05] Alice: hi\nBob (0:40): hello\n1:02:30 Alice: wrapping up";
        let parsed = parse_content("t.txt", text, TranscriptFormat::Plain).unwrap();
        assert_eq!(parsed.lines.len(), 3);
        assert_eq!(parsed.lines[0].seconds, Some(5));
        assert_eq!(parsed.lines[1].speaker, "Bob");
        assert_eq!(parsed.lines[1].seconds, Some(40));
        assert_eq!(parsed.lines[2].seconds, Some(3750));
        assert_eq!(parsed.duration_minutes, Some(62.5));
    }

    #[test]
    fn test_header_style_speaker_lines() {
        let text = "Sarah Chen  0:03\nWe need SOC 2 before legal signs.\nMe  0:15\nUnderstood.";
        let parsed = parse_content("otter.txt", text, TranscriptFormat::Plain).unwrap();
        assert_eq!(parsed.lines.len(), 2);
        assert_eq!(parsed.lines[0].content, "We need SOC 2 before legal signs.");
        assert_eq!(parsed.lines[1].speaker, "Me");
    }

    #[test]
    fn test_sentences_with_colons_are_not_speakers() {
        let text = "the plan is: ship it\nNote that pricing changed: a lot";
        let parsed = parse_content("n.txt", text, TranscriptFormat::Plain).unwrap();
        assert!(parsed.speakers.is_empty());
        assert_eq!(parsed.lines.len(), 1);
        assert_eq!(parsed.lines[0].speaker, UNKNOWN_SPEAKER);
    }

    #[test]
    fn test_no_speakers_is_one_unknown_block() {
        let text = "just some notes\nwithout anyone talking";
        let parsed = parse_content("notes.txt", text, TranscriptFormat::Plain).unwrap();
        assert_eq!(parsed.lines.len(), 1);
        assert_eq!(parsed.lines[0].content, text);
        assert!(parsed.speakers.is_empty());
        assert!(parsed.duration_minutes.is_none());
    }

    #[test]
    fn test_empty_file_does_not_crash() {
        let parsed = parse_content("empty.txt", "   \n", TranscriptFormat::Plain).unwrap();
        assert_eq!(parsed.lines.len(), 1);
        assert_eq!(parsed.lines[0].speaker, UNKNOWN_SPEAKER);
        assert!(parsed.lines[0].content.trim().is_empty());
        assert!(parsed.speakers.is_empty());
    }

    #[test]
    fn test_markdown_frontmatter_and_emphasis() {
        let text = "---\ndate: 2026-02-11\ntype: demo\nduration: 45 min\n---\n# Acme demo\n\n**Dana:** Can we see reporting?\n- **Me:** Sure.\n";
        let parsed = parse_content("x.md", text, TranscriptFormat::Markdown).unwrap();
        assert_eq!(parsed.call_date.as_deref(), Some("2026-02-11"));
        assert_eq!(parsed.call_type.as_deref(), Some("demo"));
        assert_eq!(parsed.duration_minutes, Some(45.0));
        assert_eq!(parsed.context.as_deref(), Some("Acme demo"));
        assert_eq!(parsed.speakers, vec!["Dana", "Me"]);
    }

    #[test]
    fn test_json_transcript_with_metadata() {
        let text = r#"{"transcript": "Alice: hi\nBob: hello", "metadata": {"date": "2026-01-05", "duration": 30, "type": "discovery"}}"#;
        let parsed = parse_content("a.json", text, TranscriptFormat::Json).unwrap();
        assert_eq!(parsed.speakers, vec!["Alice", "Bob"]);
        assert_eq!(parsed.call_date.as_deref(), Some("2026-01-05"));
        assert_eq!(parsed.duration_minutes, Some(30.0));
        assert_eq!(parsed.call_type.as_deref(), Some("discovery"));
    }

    #[test]
    fn test_json_segment_list_shapes() {
        let text = r#"{"segments": [
            {"speaker": "Alice", "text": "hi", "start_time": 0},
            {"speaker": "Bob", "content": "budget is 50k", "start_time": 125}
        ]}"#;
        let parsed = parse_content("b.json", text, TranscriptFormat::Json).unwrap();
        assert_eq!(parsed.lines.len(), 2);
        assert_eq!(parsed.lines[1].timestamp.as_deref(), Some("0:02:05"));
        assert_eq!(parsed.duration_minutes, Some(2.1));

        let lines = r#"{"lines": [{"speaker": "Cy", "content": "x", "timestamp": "0:10"}]}"#;
        let parsed = parse_content("c.json", lines, TranscriptFormat::Json).unwrap();
        assert_eq!(parsed.lines[0].seconds, Some(10));
    }

    #[test]
    fn test_oversized_timestamps_are_dropped() {
        assert_eq!(timestamp_seconds("99999999:00"), None);
        assert_eq!(timestamp_seconds("99999999:00:00"), None);
        assert_eq!(timestamp_seconds("71582788:15"), Some(4_294_967_295));

        let text = r#"{"lines": [
            {"speaker": "A", "content": "hello", "timestamp": "99999999:00"},
            {"speaker": "B", "content": "hi", "timestamp": "99999999:00:00"}
        ]}"#;
        let parsed = parse_content("call.json", text, TranscriptFormat::Json).unwrap();
        assert_eq!(parsed.lines.len(), 2);
        assert!(parsed.lines.iter().all(|l| l.seconds.is_none()));
        assert!(parsed.duration_minutes.is_none());

        let md = "---\nduration: 99999999:00:00\n---\nDana: hi\n";
        let parsed = parse_content("x.md", md, TranscriptFormat::Markdown).unwrap();
        assert!(parsed.duration_minutes.is_none());
    }

    #[test]
    fn test_invalid_json_is_a_parse_error() {
        assert!(matches!(
            parse_content("bad.json", "{not json", TranscriptFormat::Json),
            Err(ParseError::Json(_))
        ));
        assert!(matches!(
            parse_content("bad.json", r#"{"foo": 1}"#, TranscriptFormat::Json),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn test_filename_hints() {
        let hints = filename_hints("2026-03-01_Acme-discovery.txt");
        assert_eq!(hints.call_date.as_deref(), Some("2026-03-01"));
        assert_eq!(hints.call_type.as_deref(), Some("discovery"));
        assert_eq!(hints.context.as_deref(), Some("Acme discovery"));

        assert_eq!(filename_hints("2026-13-45 call.txt").call_date, None);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(accepted_format(Path::new("a.TXT")), Some(TranscriptFormat::Plain));
        assert_eq!(accepted_format(Path::new("a.md")), Some(TranscriptFormat::Markdown));
        assert_eq!(accepted_format(Path::new("a.docx")), None);
        assert_eq!(detect_format(Path::new("a.vtt")), TranscriptFormat::Plain);
    }

    #[test]
    fn test_parse_file_rejects_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin.txt");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x81]).unwrap();
        assert!(matches!(parse_file(&path), Err(ParseError::Encoding(_))));
    }
}
