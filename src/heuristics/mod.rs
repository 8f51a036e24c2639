// src/heuristics/mod.rs

mod proximity;
mod sections;

pub use proximity::find_near;
pub use sections::header_column;

/// Default number of characters allowed between a label and its value.
pub const DEFAULT_WINDOW: usize = 60;

/// One way of digging a single value out of unstructured report text.
///
/// Fields carry an ordered list of rules; the first rule that yields a value
/// wins. Proximity rules come first, the coarser positional rules after them.
#[derive(Debug, Clone, Copy)]
pub enum TextRule {
    /// A number printed next to one of the labels (most specific label first).
    Near {
        labels: &'static [&'static str],
        window: usize,
    },
    /// "#Customers: 123", else the first standalone integer.
    CustomerCount,
    /// The n-th (1-based) standalone integer in the text.
    NthInteger(usize),
    /// The largest amount anywhere in the text.
    LargestAmount,
    /// The sum of amounts around the first section marker found.
    SectionSum { markers: &'static [&'static str] },
    /// A number right after a span mentioning both words, in either order.
    AfterSpan {
        first: &'static str,
        second: &'static str,
        window: usize,
    },
    /// The first amount anywhere in the text.
    FirstAmount,
}

impl TextRule {
    pub fn apply(&self, text: &str) -> Option<f64> {
        match *self {
            TextRule::Near { labels, window } => find_near(text, labels, window),
            TextRule::CustomerCount => sections::customer_count(text),
            TextRule::NthInteger(n) => sections::nth_integer(text, n),
            TextRule::LargestAmount => sections::largest_amount(text),
            TextRule::SectionSum { markers } => sections::section_sum(text, markers),
            TextRule::AfterSpan {
                first,
                second,
                window,
            } => sections::after_span(text, first, second, window),
            TextRule::FirstAmount => sections::first_amount(text),
        }
    }
}

/// Run `rules` in order over `text` and return the first value found.
pub fn first_match(rules: &[TextRule], text: &str) -> Option<f64> {
    rules.iter().find_map(|rule| rule.apply(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EBT_RULES: &[TextRule] = &[
        TextRule::Near {
            labels: &["EBT", "E B T"],
            window: 10,
        },
        TextRule::AfterSpan {
            first: "EBT",
            second: "TOTAL",
            window: DEFAULT_WINDOW,
        },
        TextRule::FirstAmount,
    ];

    #[test]
    fn test_first_rule_wins() {
        assert_eq!(first_match(EBT_RULES, "EBT: $45.10 CREDIT 900.00"), Some(45.1));
    }

    #[test]
    fn test_cascade_falls_through() {
        let text = "EBT food and cash benefits for the batch, TOTAL 77.70";
        assert_eq!(first_match(EBT_RULES, text), Some(77.7));
        assert_eq!(first_match(EBT_RULES, "batch closed 12.00"), Some(12.0));
        assert_eq!(first_match(EBT_RULES, "NOT_FOUND"), None);
    }

    #[test]
    fn test_empty_rules() {
        assert_eq!(first_match(&[], "EBT 1.00"), None);
    }
}
