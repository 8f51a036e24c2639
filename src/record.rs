// src/record.rs

use crate::numbers;
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

/// Which extraction path produced a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// The vision model reply (structured record or proximity match over it).
    Primary,
    /// The fallback text-recognition output.
    Fallback,
    /// Computed from other fields.
    Derived,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldValue {
    pub value: Option<f64>,
    pub source: Source,
}

impl FieldValue {
    pub const ABSENT: FieldValue = FieldValue {
        value: None,
        source: Source::None,
    };

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

/// Values for a fixed, declared set of field names.
///
/// Every declared key is always present; absence is recorded as a `None`
/// value, never by dropping the key. Keys keep their declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRecord {
    entries: Vec<(String, FieldValue)>,
}

impl FieldRecord {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: names
                .into_iter()
                .map(|n| (n.into(), FieldValue::ABSENT))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// The value of `name`, `None` if absent or undeclared.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|v| v.value)
    }

    /// Set a declared field. Undeclared names are ignored and reported as `false`.
    pub fn set(&mut self, name: &str, value: Option<f64>, source: Source) -> bool {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => {
                *slot = match value {
                    Some(v) => FieldValue {
                        value: Some(v),
                        source,
                    },
                    None => FieldValue::ABSENT,
                };
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|(_, v)| v.is_present()).count()
    }

    pub fn has_any(&self) -> bool {
        self.present_count() > 0
    }

    /// Fold a fallback record into this one, field by field.
    ///
    /// Absent fields take the fallback value; where both hold a value the
    /// reconciliation rule decides. Fields unknown to `self` are ignored.
    pub fn merge_fallback(&mut self, fallback: &FieldRecord) {
        for (name, slot) in self.entries.iter_mut() {
            let other = fallback.value(name);
            let (value, source) = reconcile(slot.value, other);
            *slot = match value {
                Some(v) if source == Source::Primary => FieldValue {
                    value: Some(v),
                    source: slot.source,
                },
                Some(v) => FieldValue {
                    value: Some(v),
                    source,
                },
                None => FieldValue::ABSENT,
            };
        }
    }

    /// Fill derived fields whose inputs are all present and which were not
    /// supplied directly.
    pub fn apply_derived(&mut self, rules: &[DerivedRule]) {
        for rule in rules {
            if self.value(rule.target).is_some() {
                continue;
            }
            let inputs: Option<Vec<f64>> = rule.inputs.iter().map(|i| self.value(i)).collect();
            if let Some(inputs) = inputs {
                self.set(rule.target, Some(inputs.iter().sum()), Source::Derived);
            }
        }
    }
}

impl Serialize for FieldRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// `target = sum(inputs)`, e.g. `total_cashes = machine_cashes + scratch_cashes`.
#[derive(Debug, Clone, Copy)]
pub struct DerivedRule {
    pub target: &'static str,
    pub inputs: &'static [&'static str],
}

/// Decide between the vision value and the fallback value of one field.
///
/// Handwritten amounts are rarely whole numbers, so a whole vision value
/// facing a fractional fallback value is taken as a misread and the fallback
/// wins. In every other case the vision value stands.
pub fn reconcile(primary: Option<f64>, fallback: Option<f64>) -> (Option<f64>, Source) {
    match (primary, fallback) {
        (Some(p), Some(f)) if numbers::is_whole(p) && !numbers::is_whole(f) => {
            (Some(f), Source::Fallback)
        }
        (Some(p), _) => (Some(p), Source::Primary),
        (None, Some(f)) => (Some(f), Source::Fallback),
        (None, None) => (None, Source::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOTTO_TOTAL: DerivedRule = DerivedRule {
        target: "total_cashes",
        inputs: &["machine_cashes", "scratch_cashes"],
    };

    fn lotto_record() -> FieldRecord {
        FieldRecord::new(["net_sales", "machine_cashes", "scratch_cashes", "total_cashes"])
    }

    #[test]
    fn test_every_declared_key_present() {
        let record = lotto_record();
        assert_eq!(record.len(), 4);
        assert_eq!(record.get("debit"), None);
        assert_eq!(record.get("net_sales"), Some(&FieldValue::ABSENT));
        assert!(!record.has_any());
    }

    #[test]
    fn test_set_ignores_undeclared() {
        let mut record = lotto_record();
        assert!(!record.set("debit", Some(1.0), Source::Primary));
        assert!(record.set("net_sales", Some(0.0), Source::Primary));
        // zero is a present value
        assert_eq!(record.present_count(), 1);
    }

    #[test]
    fn test_derived_total_is_exact_sum() {
        let mut record = lotto_record();
        record.set("machine_cashes", Some(2.0), Source::Primary);
        record.set("scratch_cashes", Some(122.0), Source::Primary);
        record.apply_derived(&[LOTTO_TOTAL]);
        assert_eq!(record.value("total_cashes"), Some(124.0));
        assert_eq!(record.get("total_cashes").unwrap().source, Source::Derived);
    }

    #[test]
    fn test_derived_never_overwrites_supplied_value() {
        let mut record = lotto_record();
        record.set("machine_cashes", Some(2.0), Source::Primary);
        record.set("scratch_cashes", Some(122.0), Source::Primary);
        record.set("total_cashes", Some(0.0), Source::Primary);
        record.apply_derived(&[LOTTO_TOTAL]);
        assert_eq!(record.value("total_cashes"), Some(0.0));
    }

    #[test]
    fn test_derived_needs_all_inputs() {
        let mut record = lotto_record();
        record.set("machine_cashes", Some(2.0), Source::Primary);
        record.apply_derived(&[LOTTO_TOTAL]);
        assert_eq!(record.value("total_cashes"), None);
    }

    #[test]
    fn test_reconcile_prefers_fractional_fallback_over_whole_primary() {
        assert_eq!(reconcile(Some(5.0), Some(5.25)), (Some(5.25), Source::Fallback));
        assert_eq!(reconcile(Some(5.10), Some(5.0)), (Some(5.10), Source::Primary));
        assert_eq!(reconcile(Some(5.0), Some(6.0)), (Some(5.0), Source::Primary));
        assert_eq!(reconcile(Some(5.5), Some(6.25)), (Some(5.5), Source::Primary));
        assert_eq!(reconcile(None, Some(3.0)), (Some(3.0), Source::Fallback));
        assert_eq!(reconcile(None, None), (None, Source::None));
    }

    #[test]
    fn test_merge_fallback_per_field() {
        let mut primary = FieldRecord::new(["total_cash", "additional_sum", "morning"]);
        primary.set("total_cash", Some(1200.0), Source::Primary);
        primary.set("additional_sum", Some(32.75), Source::Primary);

        let mut fallback = FieldRecord::new(["total_cash", "additional_sum", "morning"]);
        fallback.set("total_cash", Some(1200.5), Source::Fallback);
        fallback.set("additional_sum", Some(30.0), Source::Fallback);
        fallback.set("morning", Some(41.0), Source::Fallback);

        primary.merge_fallback(&fallback);
        assert_eq!(primary.value("total_cash"), Some(1200.5));
        assert_eq!(primary.get("total_cash").unwrap().source, Source::Fallback);
        assert_eq!(primary.value("additional_sum"), Some(32.75));
        assert_eq!(primary.get("additional_sum").unwrap().source, Source::Primary);
        assert_eq!(primary.get("morning").unwrap().source, Source::Fallback);
    }

    #[test]
    fn test_serializes_in_declaration_order() {
        let mut record = FieldRecord::new(["net_sales_total", "credit", "debit"]);
        record.set("credit", Some(567.89), Source::Primary);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"net_sales_total":{"value":null,"source":"none"},"credit":{"value":567.89,"source":"primary"},"debit":{"value":null,"source":"none"}}"#
        );
    }
}
