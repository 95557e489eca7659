//! JSON extraction from free-form model output.
//!
//! Models wrap JSON in prose and code fences, and local models like to leave
//! trailing commas. `parse_json` strips fences, isolates the outermost
//! object or array, and tolerates trailing commas before giving up.

use serde_json::Value;

use super::LlmError;

/// Parse model output as JSON, or fail with `Malformed` carrying the raw text.
pub fn parse_json(text: &str) -> Result<Value, LlmError> {
    let candidate = extract_json(text).ok_or_else(|| LlmError::Malformed {
        message: "no JSON object or array found".to_string(),
        raw: text.to_string(),
    })?;

    match serde_json::from_str(candidate) {
        Ok(value) => Ok(value),
        Err(first) => serde_json::from_str(&strip_trailing_commas(candidate)).map_err(|_| {
            LlmError::Malformed {
                message: first.to_string(),
                raw: text.to_string(),
            }
        }),
    }
}

/// Prompt asking the model to restate its own output as bare JSON.
pub fn repair_prompt(raw: &str) -> String {
    format!(
        "The following text was supposed to be valid JSON but could not be parsed.\n\
         Return ONLY the corrected JSON, with no commentary and no code fences.\n\n{}",
        raw
    )
}

/// Find the outermost balanced `{...}` or `[...]`, looking inside a code
/// fence first when there is one.
pub fn extract_json(text: &str) -> Option<&str> {
    let body = fenced_body(text).unwrap_or(text);
    let start = body.find(['{', '['])?;
    let open = body.as_bytes()[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, &b) in body.as_bytes().iter().enumerate().skip(start) {
        if escape {
            escape = false;
            continue;
        }
        if b == b'\\' && in_string {
            escape = true;
            continue;
        }
        if b == b'"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(&body[start..=i]);
            }
        }
    }
    None
}

fn fenced_body(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip an info string such as `json`.
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn strip_trailing_commas(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escape = false;
    let chars: Vec<char> = json.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if escape {
            escape = false;
            out.push(c);
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = !in_string;
        }
        if c == ',' && !in_string {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}
