//! Flexible timestamp parsing: ordered exact formats, then permissive
//! inference, then null. Never fails.
//!
//! RULE: `%m/%d/%Y` is tried before `%d/%m/%Y`, so locale-ambiguous
//! dates ("03/04/2024") resolve as MM/DD. That matches what the
//! upstream extracts have always produced; do not reorder without a
//! source-format contract change.

use chrono::{NaiveDate, NaiveDateTime};

use crate::normalize;

/// Exact formats, tried in declared order; first full match wins.
/// The bool marks formats that carry a time component.
const FORMATS: &[(&str, bool)] = &[
    ("%Y-%m-%d %H:%M:%S", true),
    ("%Y/%m/%d %H:%M:%S", true),
    ("%m/%d/%Y %H:%M:%S", true),
    ("%d/%m/%Y %H:%M:%S", true),
    ("%Y-%m-%d", false),
    ("%Y/%m/%d", false),
    ("%m/%d/%Y", false),
    ("%d/%m/%Y", false),
    ("%Y-%m-%d %H:%M", true),
    ("%m/%d/%Y %H:%M", true),
];

/// Fallback shapes for input that misses every contract format.
const INFER_FORMATS: &[(&str, bool)] = &[
    ("%Y-%m-%dT%H:%M:%S", true),
    ("%Y-%m-%d %H:%M:%S%.f", true),
    ("%Y-%m-%dT%H:%M:%S%.f", true),
    ("%Y%m%d%H%M%S", true),
    ("%Y%m%d", false),
];

/// Parse one raw timestamp cell. Date-only formats resolve to
/// midnight. Null tokens, empty cells, and unparsable text all come
/// back as None.
pub fn parse_flexible(value: Option<&str>) -> Option<NaiveDateTime> {
    let raw = value?.trim();
    if normalize::is_null_text(Some(raw)) {
        return None;
    }
    try_formats(raw, FORMATS).or_else(|| infer(raw))
}

fn try_formats(raw: &str, formats: &[(&str, bool)]) -> Option<NaiveDateTime> {
    for (format, has_time) in formats {
        if *has_time {
            if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
                return Some(dt);
            }
        } else if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn infer(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    try_formats(raw, INFER_FORMATS)
}
