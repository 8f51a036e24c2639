// src/numbers.rs

use regex::Regex;

/// Characters removed before a token is parsed: currency symbols, thousands
/// separators and the zero-width characters OCR engines like to emit.
const STRIP_CHARS: &[char] = &[
    '$', '€', '£', '¥', ',', '\u{200b}', '\u{200c}', '\u{200d}', '\u{feff}',
];

/// Convert a raw numeric-looking token into a signed value.
///
/// * `"$1,234.56"` -> `1234.56`
/// * `"(123.45)"`  -> `-123.45`
/// * `"122.00-"`   -> `122.00` (the printed reports use a trailing minus to mark a
///   payout, the magnitude is what goes into the sheet)
///
/// Returns `None` when nothing numeric can be recovered. Never panics.
pub fn normalize(token: &str) -> Option<f64> {
    let cleaned: String = token
        .chars()
        .filter(|c| !STRIP_CHARS.contains(c) && !c.is_whitespace())
        .collect();

    // Trailing minus is a magnitude marker, not a sign.
    let cleaned = cleaned.trim_end_matches('-');

    let (negative, body) = match cleaned
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
    {
        Some(inner) => (true, inner.trim_end_matches('-')),
        None => (false, cleaned),
    };
    let body = body.strip_prefix('+').unwrap_or(body);

    if let Some(v) = parse_plain_decimal(body) {
        return Some(if negative { -v } else { v });
    }

    // Last resort: the first signed decimal buried in the token.
    let re = Regex::new(r"-?\d+(?:\.\d+)?").ok()?;
    let m = re.find(body)?;
    let v: f64 = m.as_str().parse().ok()?;
    Some(if negative { -v } else { v })
}

/// Parse only plain decimal notation. `f64::from_str` also accepts `inf`,
/// `NaN` and exponents, none of which appear on a till receipt.
fn parse_plain_decimal(s: &str) -> Option<f64> {
    let re = Regex::new(r"^-?(?:\d+\.?\d*|\.\d+)$").ok()?;
    if !re.is_match(s) {
        return None;
    }
    s.parse().ok()
}

/// True when `v` carries no fractional part.
pub fn is_whole(v: f64) -> bool {
    v.is_finite() && (v - v.trunc()).abs() < 1e-9
}
