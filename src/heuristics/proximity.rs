use crate::numbers;
use regex::Regex;

/// A printed amount: optional sign/currency/paren prefix, digits with optional
/// thousands groups, optional decimals, optional closing paren.
pub(crate) const NUMBER: &str = r"[\$\-\(]?\s*(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?\)?";

/// Characters allowed between a label and its number. Anything that can start
/// a number is excluded so the whole token lands in the capture group.
const GAP: &str = r"[^0-9\$\(\-]";

/// Locate a number printed next to any of `labels`.
///
/// Labels are tried in the order given. For each label the "label … number"
/// layout is tried before "number … label". At most `window` characters may sit
/// between the two. Matching is case-insensitive and runs over the text with
/// whitespace collapsed, so line breaks inside a receipt row do not matter.
pub fn find_near(text: &str, labels: &[&str], window: usize) -> Option<f64> {
    if text.trim().is_empty() {
        return None;
    }
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");

    for label in labels {
        if label.trim().is_empty() {
            continue;
        }
        let escaped = regex::escape(label);

        let after = format!(r"(?i){escaped}{GAP}{{0,{window}}}({NUMBER})");
        if let Some(v) = capture_number(&after, &flat) {
            return Some(v);
        }

        let before = format!(r"(?i)({NUMBER}){GAP}{{0,{window}}}{escaped}");
        if let Some(v) = capture_number(&before, &flat) {
            return Some(v);
        }
    }
    None
}

fn capture_number(pattern: &str, text: &str) -> Option<f64> {
    let re = Regex::new(pattern).ok()?;
    re.captures_iter(text)
        .find_map(|c| c.get(1).and_then(|m| numbers::normalize(m.as_str())))
}
