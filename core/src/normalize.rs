//! Value normalization — total conversions with explicit defaults.
//!
//! Source extracts are dirty: mixed sentinels for missing values,
//! free-text numerics, unparsable dates. Every function here returns
//! a best-effort value and never fails; a single bad cell must not
//! abort downstream computation.

use chrono::{NaiveDate, NaiveDateTime};

use crate::timeparse;

/// Tokens meaning "no value" in text and date cells (case-insensitive).
pub const NULL_TOKENS: &[&str] = &["null", "n/a", "nan", "<null>", "#n/a"];

/// Tokens meaning "no value" in numeric cells. Checked before the
/// float parse, which would otherwise accept `nan` and `inf`.
pub const FLOAT_SENTINELS: &[&str] = &["null", "n/a", "nan", "inf", "-inf", "<null>", "#n/a"];

/// True when the cell carries no usable text: absent, empty after
/// trimming, or a known null token.
pub fn is_null_text(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(v) => {
            let trimmed = v.trim();
            trimmed.is_empty() || NULL_TOKENS.contains(&trimmed.to_lowercase().as_str())
        }
    }
}

/// Parse a numeric cell: None for sentinels, empty cells, and
/// unparsable text. Amount columns keep their null-ness through this
/// so "missing" stays distinguishable from an actual zero.
pub fn opt_float(value: Option<&str>) -> Option<f64> {
    let raw = value?.trim();
    if raw.is_empty() {
        return None;
    }
    let lowered = raw.to_lowercase();
    if FLOAT_SENTINELS.contains(&lowered.as_str()) {
        return None;
    }
    lowered.parse::<f64>().ok()
}

/// Parse a numeric cell, falling back to `default` for sentinels and
/// anything unparsable.
pub fn to_float(value: Option<&str>, default: f64) -> f64 {
    opt_float(value).unwrap_or(default)
}

/// Render a cell as text, falling back to `default` for null-like
/// input. Surviving values come back trimmed.
pub fn to_string(value: Option<&str>, default: &str) -> String {
    if is_null_text(value) {
        default.to_string()
    } else {
        value.unwrap_or(default).trim().to_string()
    }
}

/// Text cell as an optional: None for null-like input, trimmed
/// otherwise. The aggregator uses this where "missing" must stay
/// distinguishable from any concrete value.
pub fn opt_string(value: Option<&str>) -> Option<String> {
    if is_null_text(value) {
        None
    } else {
        value.map(|v| v.trim().to_string())
    }
}

/// Parse a date-bearing text cell and render it with `pattern`.
/// Null-like or unparsable input yields `default`.
pub fn format_date(value: Option<&str>, pattern: &str, default: &str) -> String {
    match timeparse::parse_flexible(value) {
        Some(dt) => dt.format(pattern).to_string(),
        None => default.to_string(),
    }
}

/// Render an already-parsed date with `pattern`, `default` for None.
pub fn format_opt_date(value: Option<NaiveDate>, pattern: &str, default: &str) -> String {
    match value {
        Some(d) => d.format(pattern).to_string(),
        None => default.to_string(),
    }
}

/// Render an already-parsed timestamp with `pattern`, `default` for None.
pub fn format_opt_datetime(value: Option<NaiveDateTime>, pattern: &str, default: &str) -> String {
    match value {
        Some(dt) => dt.format(pattern).to_string(),
        None => default.to_string(),
    }
}
