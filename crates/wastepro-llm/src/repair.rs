//! Repair helpers for model output that is almost JSON.
//!
//! Responses are frequently wrapped in markdown fences or trail off into
//! commentary. The repair pass strips fences, cuts the text back to the
//! last balanced `}` or `]`, and normalizes whitespace around keys; what
//! still fails to parse is an invalid response.

use serde_json::{Map, Value};

use crate::provider::{LlmError, LlmResult};

/// Strip markdown code fences and any text outside the outermost JSON
/// value, truncating to the last position where braces and brackets are
/// balanced.
pub fn fix_json(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }
    let text = text.trim();

    let start = match text.find(|c| c == '{' || c == '[') {
        Some(idx) => idx,
        None => return text.to_string(),
    };
    let candidate = &text[start..];

    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut last_balanced = None;
    for (idx, ch) in candidate.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    last_balanced = Some(idx + ch.len_utf8());
                }
            }
            _ => {}
        }
    }

    match last_balanced {
        Some(end) => candidate[..end].to_string(),
        None => candidate.to_string(),
    }
}

/// Parse a repaired JSON object, normalizing whitespace inside keys.
pub fn parse_object(raw: &str) -> LlmResult<Map<String, Value>> {
    match parse_value(raw)? {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(key, value)| (key.trim().to_string(), value))
            .collect()),
        other => Err(LlmError::InvalidResponse(format!(
            "expected a JSON object, got: {other}"
        ))),
    }
}

/// Parse any repaired JSON value.
pub fn parse_value(raw: &str) -> LlmResult<Value> {
    let repaired = fix_json(raw);
    serde_json::from_str(&repaired)
        .map_err(|e| LlmError::InvalidResponse(format!("{e}; response: {raw}")))
}
