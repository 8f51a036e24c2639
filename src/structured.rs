// src/structured.rs

use crate::numbers;
use serde_json::{Map, Value};
use std::ops::Range;

/// A JSON object lifted out of a model reply.
pub type StructuredRecord = Map<String, Value>;

/// Find and decode the JSON object embedded in a free-text model reply.
///
/// Models wrap their answer in prose, markdown fences or reasoning text. The
/// first balanced `{ … }` region (string- and escape-aware) is tried first; if
/// that does not decode, the greedy span from the first `{` to the last `}` is
/// tried. Anything else, including valid JSON that is not an object, is `None`.
pub fn parse(text: &str) -> Option<StructuredRecord> {
    locate(text).map(|(record, _)| record)
}

/// Like [`parse`], also returning the byte range the record was read from.
pub fn locate(text: &str) -> Option<(StructuredRecord, Range<usize>)> {
    let start = text.find('{')?;

    if let Some(end) = balanced_end(text, start) {
        if let Some(record) = decode_object(&text[start..=end]) {
            return Some((record, start..end + 1));
        }
    }

    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    decode_object(&text[start..=end]).map(|record| (record, start..end + 1))
}

/// The reply with the record cut out, for label matching over the prose
/// around it.
pub fn residual_text(text: &str, span: &Range<usize>) -> String {
    format!("{}\n{}", &text[..span.start], &text[span.end..])
}

fn decode_object(candidate: &str) -> Option<StructuredRecord> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Byte index of the `}` closing the `{` at `start`.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Coerce a JSON value into a number: numbers as-is, strings through the
/// normalizer, everything else (null included) is absent.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => numbers::normalize(s),
        _ => None,
    }
}

/// The first alias whose value is present (not null, convertible).
///
/// A present `0` stops the search; only absent values fall through.
pub fn lookup_number(record: &StructuredRecord, aliases: &[&str]) -> Option<f64> {
    aliases
        .iter()
        .filter_map(|key| record.get(*key))
        .find_map(as_number)
}

/// The first alias holding an array, with each element coerced.
pub fn lookup_array(record: &StructuredRecord, aliases: &[&str]) -> Option<Vec<Option<f64>>> {
    aliases
        .iter()
        .filter_map(|key| record.get(*key))
        .find_map(|v| v.as_array())
        .map(|items| items.iter().map(as_number).collect())
}
