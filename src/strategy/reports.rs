// src/strategy/reports.rs

//! The report layouts the store photographs every day.

use super::{FieldSpec, ImageSlot, Report, RowSpec, SlotFields};
use crate::heuristics::{DEFAULT_WINDOW, TextRule};
use crate::record::DerivedRule;

/// Default run order.
pub static ALL: &[&Report] = &[
    &DAY1_REPORT,
    &DAY2_REPORT,
    &DAY3_REPORT,
    &HANDWRITTEN,
    &LOTTO,
    &SHIFTS,
    &BATCH,
    &HANDWRITTEN_LOTTO_END,
];

pub fn by_name(name: &str) -> Option<&'static Report> {
    ALL.iter().copied().find(|r| r.name == name)
}

// ---------------------------------------------------------------------------
// Day report, page 1: sales summary and cashier details
// ---------------------------------------------------------------------------

const DAY1_PROMPT: &str = r#"
This is page 1 of a store's end-of-day report. Extract:

1. The net sales total (labelled 'Net Sales Total', 'Total Net Sales' or similar).
2. The credit amount from the cashier details (exclude MOP sales).
3. The debit amount from the cashier details (exclude MOP sales).

Reply with a JSON object only, for example:
{"net_sales_total": 1234.56, "credit": 567.89, "debit": 123.45}
Use null for any value you cannot read.
"#;

const DAY1_FIELDS: &[FieldSpec] = &[
    FieldSpec::amount(
        "net_sales_total",
        &["net_sales_total", "total_net_sales", "net_sales"],
        &[TextRule::Near {
            labels: &["Net Sales Total", "Total Net Sales", "Net Sales"],
            window: DEFAULT_WINDOW,
        }],
        &["L7"],
    ),
    FieldSpec::amount(
        "credit",
        &["credit", "credit_amount"],
        &[TextRule::Near {
            labels: &["Credit"],
            window: DEFAULT_WINDOW,
        }],
        &["I12"],
    ),
    FieldSpec::amount(
        "debit",
        &["debit", "debit_amount"],
        &[TextRule::Near {
            labels: &["Debit"],
            window: DEFAULT_WINDOW,
        }],
        &["I13"],
    ),
];

pub static DAY1_REPORT: Report = Report {
    name: "day1_report",
    slots: &[ImageSlot {
        key: "day1_report",
        default_file: "Day_Report1.jpg",
        required: true,
        prompt: DAY1_PROMPT,
        fields: SlotFields::Scalars(DAY1_FIELDS),
    }],
    derived: &[],
};

// ---------------------------------------------------------------------------
// Day report, page 2: category report and tax report
// ---------------------------------------------------------------------------

const DAY2_PROMPT: &str = r#"
This is page 2 of a store's end-of-day report. From the Category Report section:
- the net sales value on the LOTTERY line,
- the net sales value on the Fuel Deposit line.
From the Tax Report section:
- the TAXABLE-SALES value,
- the TAXES value (may be labelled 'Sales Tax').

Reply with a JSON object only, for example:
{"lottery_net": 38.50, "fuel_deposit": 1234.56, "taxable_sales": 9876.54, "taxes": 123.45}
Use null for any value you cannot read.
"#;

const DAY2_FIELDS: &[FieldSpec] = &[
    FieldSpec::amount(
        "lottery_net",
        &["lottery_net", "lottery", "lottery_net_sales"],
        &[TextRule::Near {
            labels: &["Lottery Net Sales", "Lottery Net", "Category Lottery", "Lottery", "Lotto"],
            window: DEFAULT_WINDOW,
        }],
        &["L6"],
    ),
    FieldSpec::amount(
        "fuel_deposit",
        &["fuel_deposit", "fuel_deposit_net", "fuel_deposit_sales"],
        &[TextRule::Near {
            labels: &["Fuel Deposit Net", "Fuel Deposit Sales", "Fuel Deposit"],
            window: DEFAULT_WINDOW,
        }],
        &["F15"],
    ),
    FieldSpec::amount(
        "taxable_sales",
        &["taxable_sales", "taxable-sales", "taxable"],
        &[TextRule::Near {
            labels: &["TAXABLE-SALES", "Taxable Sales", "Taxable_Sales", "Taxable"],
            window: DEFAULT_WINDOW,
        }],
        &["F16"],
    ),
    FieldSpec::amount(
        "taxes",
        &["taxes", "tax", "sales_tax"],
        &[TextRule::Near {
            labels: &["TAXES", "Sales Tax", "Tax"],
            window: DEFAULT_WINDOW,
        }],
        &["F17", "Z11"],
    ),
];

pub static DAY2_REPORT: Report = Report {
    name: "day2_report",
    slots: &[ImageSlot {
        key: "day2_report",
        default_file: "Day_Report2.jpg",
        required: true,
        prompt: DAY2_PROMPT,
        fields: SlotFields::Scalars(DAY2_FIELDS),
    }],
    derived: &[],
};

// ---------------------------------------------------------------------------
// Day report, page 3: fuel product totals
// ---------------------------------------------------------------------------

const DAY3_PROMPT: &str = r#"
This is the FP/HOSE RUNNING RPT page of a store's end-of-day report. From the
PRODUCT TOTALS block, read the volume sold for UNLEADED, PLUS, PREMIUM and DIESEL.

Reply with a JSON object only, with exactly these keys:
{"unleaded": 1234.56, "plus": 234.56, "premium": 345.67, "diesel": 456.78}
Use null for any value you cannot read.
"#;

const DAY3_FIELDS: &[FieldSpec] = &[
    FieldSpec::amount(
        "unleaded",
        &["unleaded", "Unleaded", "regular", "REG"],
        &[TextRule::Near {
            labels: &["UNLEADED", "REGULAR", "REG"],
            window: DEFAULT_WINDOW,
        }],
        &["F26"],
    ),
    FieldSpec::amount(
        "plus",
        &["plus", "Plus"],
        &[TextRule::Near {
            labels: &["PLUS (MID)", "PLUS"],
            window: DEFAULT_WINDOW,
        }],
        &["H26"],
    ),
    FieldSpec::amount(
        "premium",
        &["premium", "Premium"],
        &[TextRule::Near {
            labels: &["PREMIUM"],
            window: DEFAULT_WINDOW,
        }],
        &["G26"],
    ),
    FieldSpec::amount(
        "diesel",
        &["diesel", "Diesel"],
        &[TextRule::Near {
            labels: &["DIESEL"],
            window: DEFAULT_WINDOW,
        }],
        &["E26"],
    ),
];

pub static DAY3_REPORT: Report = Report {
    name: "day3_report",
    slots: &[ImageSlot {
        key: "day3_report",
        default_file: "Day_Report3.jpg",
        required: true,
        prompt: DAY3_PROMPT,
        fields: SlotFields::Scalars(DAY3_FIELDS),
    }],
    derived: &[],
};

// ---------------------------------------------------------------------------
// Handwritten daily sheet
// ---------------------------------------------------------------------------

const HANDWRITTEN_PROMPT: &str = r#"
This is a photo of a handwritten daily report. Extract:

- the morning customer count ('Morning' or 'Morning Shift'),
- the evening customer count ('Evening' or 'Evening Shift'),
- the night customer count ('Night' or 'Night Shift'),
- the Total Cash amount,
- the sum of every amount listed under the 'Additional' heading (there may be
  several lines).

Reply with a JSON object only, for example:
{"morning": 123, "evening": 456, "night": 78, "total_cash": 1234.56, "additional_sum": 45.67}
Counts are integers. Use null for any value you cannot read.
"#;

const HANDWRITTEN_FIELDS: &[FieldSpec] = &[
    FieldSpec::count(
        "morning",
        &["morning"],
        &[
            TextRule::Near {
                labels: &["Morning Shift", "Morning", "Morn"],
                window: DEFAULT_WINDOW,
            },
            TextRule::NthInteger(1),
        ],
        &["D9"],
    ),
    FieldSpec::count(
        "evening",
        &["evening"],
        &[
            TextRule::Near {
                labels: &["Evening Shift", "Evening", "Eve"],
                window: DEFAULT_WINDOW,
            },
            TextRule::NthInteger(2),
        ],
        &["D11"],
    ),
    FieldSpec::count(
        "night",
        &["night"],
        &[
            TextRule::Near {
                labels: &["Night Shift", "Night"],
                window: DEFAULT_WINDOW,
            },
            TextRule::NthInteger(3),
        ],
        &["D13"],
    ),
    FieldSpec::amount(
        "total_cash",
        &["total_cash"],
        &[
            TextRule::Near {
                labels: &["Total Cash", "Cash Total", "Total"],
                window: DEFAULT_WINDOW,
            },
            TextRule::LargestAmount,
        ],
        &["L14"],
    ),
    FieldSpec::amount(
        "additional_sum",
        &["additional_sum", "additional"],
        &[TextRule::SectionSum {
            markers: &["additional", "add'l", "adds"],
        }],
        &["Z17"],
    ),
];

pub static HANDWRITTEN: Report = Report {
    name: "handwritten",
    slots: &[ImageSlot {
        key: "handwritten",
        default_file: "Handwritten_Report.jpg",
        required: true,
        prompt: HANDWRITTEN_PROMPT,
        fields: SlotFields::Scalars(HANDWRITTEN_FIELDS),
    }],
    derived: &[],
};

// ---------------------------------------------------------------------------
// Lotto machine report
// ---------------------------------------------------------------------------

const LOTTO_PROMPT: &str = r#"
This is a lottery terminal report. Find:

1. "DRW GM NET SALES" (or "DRAW GM NET SALES") and the dollar amount after it.
2. "DRW GM CASHES" (or "DRAW GM CASHES") and the dollar amount after it.
3. "SCRATCH CASHES" and the dollar amount after it.

Keep decimal points (38.50, not 3850). Drop dollar signs and minus signs.

Reply with a JSON object only, for example:
{"drw_gm_net_sales": 38.50, "drw_gm_cashes": 2.00, "scratch_cashes": 122.00}
"#;

const LOTTO_FIELDS: &[FieldSpec] = &[
    FieldSpec::amount(
        "net_sales",
        &["drw_gm_net_sales", "draw_gm_net_sales", "net_sales"],
        &[TextRule::Near {
            labels: &["DRW GM NET SALES", "DRAW GM NET SALES", "NET SALES"],
            window: DEFAULT_WINDOW,
        }],
        &["T30"],
    ),
    FieldSpec::amount(
        "machine_cashes",
        &["drw_gm_cashes", "draw_gm_cashes", "machine_cashes"],
        &[TextRule::Near {
            labels: &["DRW GM CASHES", "DRAW GM CASHES"],
            window: DEFAULT_WINDOW,
        }],
        &[],
    ),
    FieldSpec::amount(
        "scratch_cashes",
        &["scratch_cashes"],
        &[TextRule::Near {
            labels: &["SCRATCH CASHES"],
            window: DEFAULT_WINDOW,
        }],
        &[],
    ),
    FieldSpec::amount(
        "total_cashes",
        &["total_cashes"],
        &[TextRule::Near {
            labels: &["TOTAL CASHES"],
            window: DEFAULT_WINDOW,
        }],
        &["Z9"],
    ),
];

pub static LOTTO: Report = Report {
    name: "lotto",
    slots: &[ImageSlot {
        key: "lotto",
        default_file: "sample_report.jpg",
        required: true,
        prompt: LOTTO_PROMPT,
        fields: SlotFields::Scalars(LOTTO_FIELDS),
    }],
    derived: &[DerivedRule {
        target: "total_cashes",
        inputs: &["machine_cashes", "scratch_cashes"],
    }],
};

// ---------------------------------------------------------------------------
// Shift close-out slips, one photo per shift
// ---------------------------------------------------------------------------

const SHIFT_PROMPT: &str = r#"
Return only the number of customers shown on this shift report, or the text
NOT_FOUND if there is none. Look for '#Customers', 'Customers',
'No. of Customers' or similar.
"#;

const SHIFT_COUNT: &[TextRule] = &[TextRule::CustomerCount];

const MORNING_SHIFT_FIELDS: &[FieldSpec] = &[FieldSpec::count(
    "morning",
    &["customers", "morning"],
    SHIFT_COUNT,
    &["E10"],
)];

const EVENING_SHIFT_FIELDS: &[FieldSpec] = &[FieldSpec::count(
    "evening",
    &["customers", "evening"],
    SHIFT_COUNT,
    &["E12"],
)];

const NIGHT_SHIFT_FIELDS: &[FieldSpec] = &[FieldSpec::count(
    "night",
    &["customers", "night"],
    SHIFT_COUNT,
    &["E14"],
)];

pub static SHIFTS: Report = Report {
    name: "shifts",
    slots: &[
        ImageSlot {
            key: "morning_shift",
            default_file: "Morning_Shift.jpg",
            required: false,
            prompt: SHIFT_PROMPT,
            fields: SlotFields::Scalars(MORNING_SHIFT_FIELDS),
        },
        ImageSlot {
            key: "evening_shift",
            default_file: "Evening_Shift.jpg",
            required: false,
            prompt: SHIFT_PROMPT,
            fields: SlotFields::Scalars(EVENING_SHIFT_FIELDS),
        },
        ImageSlot {
            key: "night_shift",
            default_file: "Night_Shift.jpg",
            required: false,
            prompt: SHIFT_PROMPT,
            fields: SlotFields::Scalars(NIGHT_SHIFT_FIELDS),
        },
    ],
    derived: &[],
};

// ---------------------------------------------------------------------------
// Card batch report
// ---------------------------------------------------------------------------

const BATCH_PROMPT: &str = r#"
This is a card terminal batch report. Return the dollar amount of the EBT total.
Look for lines containing 'EBT' (or 'E B T') with an amount, or the word 'Total'
near EBT. Reply with one short line such as:
EBT: 123.45
If there is no EBT amount, reply NOT_FOUND.
"#;

const BATCH_FIELDS: &[FieldSpec] = &[FieldSpec::amount(
    "ebt",
    &["ebt", "ebt_total"],
    &[
        TextRule::Near {
            labels: &["EBT", "E B T"],
            window: DEFAULT_WINDOW,
        },
        TextRule::AfterSpan {
            first: "EBT",
            second: "TOTAL",
            window: DEFAULT_WINDOW,
        },
        TextRule::FirstAmount,
    ],
    &["Z10"],
)
.accumulating()];

pub static BATCH: Report = Report {
    name: "batch",
    slots: &[ImageSlot {
        key: "batch",
        default_file: "batch_report.jpg",
        required: true,
        prompt: BATCH_PROMPT,
        fields: SlotFields::Scalars(BATCH_FIELDS),
    }],
    derived: &[],
};

// ---------------------------------------------------------------------------
// Handwritten lotto "End no" column, optionally continued on a second sheet
// ---------------------------------------------------------------------------

const LOTTO_END_PROMPT: &str = r#"
This is a photo of a handwritten report. Find the 'Daily Lotto' section and its
'End no' column (or similar). Return the End no values from top to bottom as a
JSON array, for example:
{"end_values": [123, 124, 125]}
If the column is not there, reply NOT_FOUND.
"#;

const END_ALIASES: &[&str] = &["end_values", "end_no", "end", "values"];

pub static HANDWRITTEN_LOTTO_END: Report = Report {
    name: "handwritten_lotto_end",
    slots: &[
        ImageSlot {
            key: "handwritten",
            default_file: "Handwritten_Report.jpg",
            required: true,
            prompt: LOTTO_END_PROMPT,
            fields: SlotFields::Row(RowSpec {
                prefix: "end",
                aliases: END_ALIASES,
                width: 20,
                row: 26,
                first_column: 9,
            }),
        },
        ImageSlot {
            key: "handwritten_2",
            default_file: "Handwritten_Report2.jpg",
            required: false,
            prompt: LOTTO_END_PROMPT,
            fields: SlotFields::Row(RowSpec {
                prefix: "row2_end",
                aliases: END_ALIASES,
                width: 16,
                row: 33,
                first_column: 9,
            }),
        },
    ],
    derived: &[],
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_run_order() {
        let names: Vec<_> = ALL.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            [
                "day1_report",
                "day2_report",
                "day3_report",
                "handwritten",
                "lotto",
                "shifts",
                "batch",
                "handwritten_lotto_end"
            ]
        );
        assert!(by_name("lotto").is_some());
        assert!(by_name("payroll").is_none());
    }

    #[test]
    fn test_lotto_end_rows_span_their_columns() {
        let SlotFields::Row(first) = HANDWRITTEN_LOTTO_END.slots[0].fields else {
            panic!("row expected");
        };
        let SlotFields::Row(second) = HANDWRITTEN_LOTTO_END.slots[1].fields else {
            panic!("row expected");
        };
        assert_eq!(first.cell(0), "I26");
        assert_eq!(first.cell(19), "AB26");
        assert_eq!(first.field_name(19), "end_20");
        assert_eq!(second.cell(0), "I33");
        assert_eq!(second.cell(15), "X33");
        assert_eq!(second.field_name(0), "row2_end_01");
    }

    #[test]
    fn test_field_names_unique_per_report() {
        for report in ALL {
            let names: Vec<String> = report.slots.iter().flat_map(|s| s.field_names()).collect();
            let unique: HashSet<_> = names.iter().collect();
            assert_eq!(unique.len(), names.len(), "{}", report.name);
            for rule in report.derived {
                assert!(names.iter().any(|n| n == rule.target), "{}", report.name);
            }
        }
    }

    #[test]
    fn test_day2_taxes_go_to_both_cells() {
        let SlotFields::Scalars(fields) = DAY2_REPORT.slots[0].fields else {
            panic!("scalars expected");
        };
        let taxes = fields.iter().find(|f| f.name == "taxes").unwrap();
        assert_eq!(taxes.cells, ["F17", "Z11"]);
    }

    #[test]
    fn test_day2_labels_over_report_text() {
        let SlotFields::Scalars(fields) = DAY2_REPORT.slots[0].fields else {
            panic!("scalars expected");
        };
        let text = "CATEGORY REPORT\nLOTTERY 38.50\nFuel Deposit 1,234.56\nTAX REPORT\nTAXABLE-SALES 9,876.54\nTAXES 123.45";
        let values: Vec<_> = fields
            .iter()
            .map(|f| crate::heuristics::first_match(f.rules, text))
            .collect();
        assert_eq!(values, [Some(38.5), Some(1234.56), Some(9876.54), Some(123.45)]);
    }
}
