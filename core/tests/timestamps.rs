//! Integration tests for flexible timestamp parsing.

use caseflow_core::timeparse::parse_flexible;
use chrono::{Datelike, Timelike};

fn parts(input: &str) -> (i32, u32, u32, u32, u32, u32) {
    let dt = parse_flexible(Some(input)).unwrap_or_else(|| panic!("{input:?} should parse"));
    (
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
    )
}

/// Every contract format parses; date-only shapes resolve to midnight.
#[test]
fn contract_formats_all_parse() {
    let expectations = [
        ("2024-03-04 10:20:30", (2024, 3, 4, 10, 20, 30)),
        ("2024/03/04 10:20:30", (2024, 3, 4, 10, 20, 30)),
        ("03/04/2024 10:20:30", (2024, 3, 4, 10, 20, 30)),
        ("25/12/2024 10:20:30", (2024, 12, 25, 10, 20, 30)),
        ("2024-03-04", (2024, 3, 4, 0, 0, 0)),
        ("2024/03/04", (2024, 3, 4, 0, 0, 0)),
        ("03/04/2024", (2024, 3, 4, 0, 0, 0)),
        ("25/12/2024", (2024, 12, 25, 0, 0, 0)),
        ("2024-03-04 10:20", (2024, 3, 4, 10, 20, 0)),
        ("03/04/2024 10:20", (2024, 3, 4, 10, 20, 0)),
    ];
    for (input, expected) in expectations {
        assert_eq!(parts(input), expected, "input {input:?}");
    }
}

/// Slash dates that fit both readings resolve month-first; only an
/// impossible month falls through to day-first.
#[test]
fn ambiguous_slash_dates_prefer_month_first() {
    assert_eq!(parts("03/04/2024"), (2024, 3, 4, 0, 0, 0));
    assert_eq!(parts("13/04/2024"), (2024, 4, 13, 0, 0, 0));
    assert_eq!(parts("01/02/2024 08:00:00"), (2024, 1, 2, 8, 0, 0));
}

/// Input outside the contract formats still parses through inference:
/// RFC 3339, T-separated, fractional seconds, and compact digits.
#[test]
fn inference_covers_common_off_contract_shapes() {
    assert_eq!(parts("2024-05-06T14:30:00"), (2024, 5, 6, 14, 30, 0));
    assert_eq!(parts("2024-05-06T14:30:00+08:00"), (2024, 5, 6, 14, 30, 0));
    assert_eq!(parts("2024-05-06 14:30:00.250"), (2024, 5, 6, 14, 30, 0));
    assert_eq!(parts("20240506143000"), (2024, 5, 6, 14, 30, 0));
    assert_eq!(parts("20240506"), (2024, 5, 6, 0, 0, 0));
}

/// Null markers and unparsable text come back as None, never an error.
#[test]
fn null_and_garbage_read_as_none() {
    for input in ["NULL", "n/a", "NaN", "", "   ", "not a date", "99/99/9999"] {
        assert!(
            parse_flexible(Some(input)).is_none(),
            "{input:?} should not parse"
        );
    }
    assert!(parse_flexible(None).is_none());
}
