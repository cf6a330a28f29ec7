//! Defensive JSON extraction from free-form backend text.
//!
//! Backend output is untrusted. `extract_json` never fails: when nothing
//! parseable is found it returns a sentinel object carrying `error` and
//! `raw_response`, and every caller branches on `is_error_sentinel`. A
//! backend that answers with its own `{"error": ...}` object is treated the
//! same way.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)[ \t]*\r?\n?(.*?)```").expect("valid fence regex")
});

static ANY_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\r?\n?```$").expect("valid fence regex")
});

/// Pull the first JSON value out of `text`.
///
/// Tries, in order: a fenced block tagged `json`, the first balanced array,
/// the first balanced object. An array nested inside an object that starts
/// earlier is not preferred over that object. Falls back to the sentinel.
pub fn extract_json(text: &str) -> Value {
    if let Some(caps) = JSON_FENCE.captures(text)
        && let Some(body) = caps.get(1)
        && let Ok(value) = serde_json::from_str::<Value>(body.as_str().trim())
    {
        return value;
    }

    let array = first_balanced(text, '[');
    let object = first_balanced(text, '{');

    let object_first = match (&array, &object) {
        (Some(a), Some(o)) => o.start < a.start && o.end >= a.end,
        (None, Some(_)) => true,
        _ => false,
    };

    let ordered = if object_first {
        [object, array]
    } else {
        [array, object]
    };
    if let Some(span) = ordered.into_iter().flatten().next() {
        return span.value;
    }

    error_sentinel("No JSON value found in response", text)
}

/// The value returned when a response holds no usable JSON.
pub fn error_sentinel(message: &str, raw: &str) -> Value {
    json!({ "error": message, "raw_response": raw })
}

/// Whether `value` signals failure: any object with an `error` key.
pub fn is_error_sentinel(value: &Value) -> bool {
    value.as_object().is_some_and(|m| m.contains_key("error"))
}

/// Interpret a value as a list.
///
/// Accepts a bare array, or an object with exactly one array-valued field
/// (e.g. `{"questions": [...]}`).
pub fn expect_array(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) if !map.contains_key("error") => {
            let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            let first = arrays.next()?;
            if arrays.next().is_some() {
                return None;
            }
            Some(first)
        }
        _ => None,
    }
}

pub fn expect_object(value: Value) -> Option<Map<String, Value>> {
    if is_error_sentinel(&value) {
        return None;
    }
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Tidy a plain-text answer: drop surrounding code fences, markdown heading
/// marks and matching quotes.
pub fn clean_text_response(text: &str) -> String {
    let mut out = text.trim();
    if let Some(caps) = ANY_FENCE.captures(out)
        && let Some(body) = caps.get(1)
    {
        out = body.as_str().trim();
    }
    out = out.trim_start_matches('#').trim();
    for quote in ['"', '\'', '`'] {
        if out.len() >= 2 && out.starts_with(quote) && out.ends_with(quote) {
            out = out[1..out.len() - 1].trim();
        }
    }
    out.to_string()
}

struct Span {
    start: usize,
    end: usize,
    value: Value,
}

/// Find the first span opening with `open` that is balanced and parses.
fn first_balanced(text: &str, open: char) -> Option<Span> {
    text.char_indices()
        .filter(|(_, c)| *c == open)
        .find_map(|(start, _)| {
            let end = balanced_end(text, start)?;
            let value = serde_json::from_str::<Value>(&text[start..end]).ok()?;
            let shape_ok = match open {
                '[' => value.is_array(),
                _ => value.is_object(),
            };
            shape_ok.then_some(Span { start, end, value })
        })
}

/// Byte offset one past the bracket closing the one at `start`.
///
/// Brackets inside string literals are ignored and escapes are honoured.
/// A mismatched closer ends the scan without a match.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => stack.push(c),
            ']' | '}' => {
                let expected = if c == ']' { '[' } else { '{' };
                if stack.pop() != Some(expected) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(start + offset + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}
