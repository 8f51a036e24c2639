use super::proximity::NUMBER;
use crate::numbers;
use regex::Regex;

/// Customer count as printed on a shift report ("#Customers: 123"), else the
/// first standalone integer in the text.
pub fn customer_count(text: &str) -> Option<f64> {
    let re = Regex::new(r"(?i)#?\s*Customers?[:\s\-]*(\d{1,6})").ok()?;
    if let Some(v) = re
        .captures(text)
        .and_then(|c| c[1].parse::<f64>().ok())
    {
        return Some(v);
    }
    nth_integer(text, 1)
}

/// The `n`-th (1-based) standalone integer of up to six digits.
pub fn nth_integer(text: &str, n: usize) -> Option<f64> {
    if n == 0 {
        return None;
    }
    let re = Regex::new(r"\b(\d{1,6})\b").ok()?;
    re.captures_iter(text)
        .nth(n - 1)
        .and_then(|c| c[1].parse::<f64>().ok())
}

/// Every amount-looking token in `text`, normalized, in reading order.
pub fn amounts(text: &str) -> Vec<f64> {
    let Ok(re) = Regex::new(NUMBER) else {
        return Vec::new();
    };
    re.find_iter(text)
        .filter_map(|m| numbers::normalize(m.as_str()))
        .collect()
}

pub fn first_amount(text: &str) -> Option<f64> {
    amounts(text).into_iter().next()
}

pub fn largest_amount(text: &str) -> Option<f64> {
    amounts(text).into_iter().reduce(f64::max)
}

/// Sum the amounts written around a section heading such as "Additional".
///
/// The first marker found (case-insensitive) anchors a region reaching 80
/// characters back and 400 forward; every amount inside it is added up.
pub fn section_sum(text: &str, markers: &[&str]) -> Option<f64> {
    let lower = text.to_lowercase();
    let idx = markers
        .iter()
        .find_map(|m| lower.find(&m.to_lowercase()))?;

    // to_lowercase can change byte lengths for non-ASCII input
    if lower.len() != text.len() {
        return None;
    }

    let start = floor_char_boundary(text, idx.saturating_sub(80));
    let end = floor_char_boundary(text, (idx + 400).min(text.len()));
    let values = amounts(&text[start..end]);
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum())
}

/// A number within `window` characters after a span that mentions both
/// `first` and `second`, in either order ("EBT … TOTAL 12.00").
pub fn after_span(text: &str, first: &str, second: &str, window: usize) -> Option<f64> {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let (a, b) = (regex::escape(first), regex::escape(second));
    let pattern = format!(r"(?i)(?:{a}.*?{b}|{b}.*?{a}).{{0,{window}}}?({NUMBER})");
    let re = Regex::new(&pattern).ok()?;
    re.captures_iter(&flat)
        .find_map(|c| c.get(1).and_then(|m| numbers::normalize(m.as_str())))
}

const END_HEADERS: &[&str] = &[r"(?i)End\s*no", r"(?i)End\s*#", r"(?i)\bEnd\b"];
const SECTION_MARKER: &str = "daily lotto";

/// Read a handwritten column of values listed one per line under an
/// "End no" header, padded or truncated to exactly `len` entries.
///
/// A short column is topped up with the remaining numbers after the
/// "Daily Lotto" section marker (or in the whole text), skipping the ones
/// already read from the column.
pub fn header_column(text: &str, len: usize) -> Vec<Option<f64>> {
    let Ok(re) = Regex::new(r"-?\d{1,6}(?:\.\d{1,4})?") else {
        return vec![None; len];
    };
    let mut values: Vec<Option<f64>> = Vec::with_capacity(len);
    let mut taken: Vec<usize> = Vec::new();

    let lines: Vec<(usize, &str)> = text
        .split_inclusive('\n')
        .scan(0, |offset, line| {
            let start = *offset;
            *offset += line.len();
            Some((start, line))
        })
        .collect();
    let trimmed: Vec<&str> = lines.iter().map(|(_, l)| l.trim()).collect();

    if let Some(header) = find_header_line(&trimmed) {
        for (offset, line) in lines.iter().skip(header + 1).take(80) {
            if values.len() >= len {
                break;
            }
            let Some(m) = re.find(line) else { continue };
            if let Some(v) = numbers::normalize(m.as_str()) {
                values.push(Some(v));
                taken.push(offset + m.start());
            }
        }
    }

    if values.len() < len {
        let lower = text.to_lowercase();
        let tail_start = match lower.find(SECTION_MARKER) {
            Some(i) if lower.len() == text.len() => i + SECTION_MARKER.len(),
            _ => 0,
        };
        let rest = re
            .find_iter(&text[tail_start..])
            .filter(|m| !taken.contains(&(tail_start + m.start())))
            .filter_map(|m| numbers::normalize(m.as_str()))
            .take(len - values.len())
            .map(Some)
            .collect::<Vec<_>>();
        values.extend(rest);
    }

    values.resize(len, None);
    values
}

fn find_header_line(lines: &[&str]) -> Option<usize> {
    for pattern in END_HEADERS {
        let Ok(re) = Regex::new(pattern) else {
            continue;
        };
        if let Some(idx) = lines.iter().position(|l| re.is_match(l)) {
            return Some(idx);
        }
    }
    None
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
