//! Chunk processing — row typing, derivation, and cross-chunk dedup.
//!
//! RULE: rows without a usable case_id or trans_key are dropped before
//! dedup; an unidentifiable row can never be deduplicated safely. The
//! seen-key set lives for exactly one pipeline run and is consulted by
//! every later chunk, so chunk processing is order-dependent within a
//! run, not commutative.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::normalize;
use crate::schema::{idx, RawRow};
use crate::timeparse;
use crate::types::CaseId;

/// One typed transaction after mapping, normalization, and derivation.
#[derive(Debug, Clone)]
pub struct TransactionRow {
    pub case_id: CaseId,
    pub trans_key: String,
    pub trans_amt: Option<f64>,
    pub trans_datetime: Option<NaiveDateTime>,
    /// Derived: calendar date of `trans_datetime`.
    pub trans_date: Option<NaiveDate>,
    /// Derived: hour-of-day of `trans_datetime`.
    pub hour: Option<u32>,
    pub counterparty_name: Option<String>,
    pub fund_usage: Option<String>,
    pub trans_region: Option<String>,
    pub aml_channel: Option<String>,
    pub src_channel: Option<String>,
    pub trans_org: Option<String>,
    pub trans_remark: Option<String>,
    pub currency: Option<String>,
    pub ip_addr: Option<String>,
    pub mac_addr: Option<String>,
    pub income_pay_flag: String,
    pub main_cust_name: String,
    pub main_cust_id: String,
    pub main_cust_industry: String,
    pub main_cust_gender: String,
    pub main_cust_open_date: String,
    pub main_cust_addr: String,
    pub main_cust_phone_number: String,
    pub id_type: String,
    pub id_number: String,
    pub model_name: String,
    /// Raw cell; normalized to a score only at aggregation time.
    pub highest_score: Option<String>,
    pub serial_num: Option<String>,
    pub features: Option<String>,
    pub feature_value: Option<String>,
}

impl TransactionRow {
    /// Build a typed row from a mapped record. Returns None when the
    /// row carries no usable case_id or trans_key.
    pub fn from_raw(raw: &RawRow) -> Option<Self> {
        let case_id = normalize::to_string(raw.get(idx::CASE_ID), "");
        let trans_key = normalize::to_string(raw.get(idx::TRANS_KEY), "");
        if case_id.is_empty() || trans_key.is_empty() {
            return None;
        }
        let trans_datetime = timeparse::parse_flexible(raw.get(idx::TRANS_DATETIME));
        Some(Self {
            case_id,
            trans_key,
            trans_amt: normalize::opt_float(raw.get(idx::TRANS_AMT)),
            trans_date: trans_datetime.map(|dt| dt.date()),
            hour: trans_datetime.map(|dt| dt.hour()),
            trans_datetime,
            counterparty_name: normalize::opt_string(raw.get(idx::COUNTERPARTY_NAME)),
            fund_usage: normalize::opt_string(raw.get(idx::FUND_USAGE)),
            trans_region: normalize::opt_string(raw.get(idx::TRANS_REGION)),
            aml_channel: normalize::opt_string(raw.get(idx::AML_CHANNEL)),
            src_channel: normalize::opt_string(raw.get(idx::SRC_CHANNEL)),
            trans_org: normalize::opt_string(raw.get(idx::TRANS_ORG)),
            trans_remark: normalize::opt_string(raw.get(idx::TRANS_REMARK)),
            currency: normalize::opt_string(raw.get(idx::CURRENCY)),
            ip_addr: normalize::opt_string(raw.get(idx::IP_ADDR)),
            mac_addr: normalize::opt_string(raw.get(idx::MAC_ADDR)),
            income_pay_flag: normalize::to_string(raw.get(idx::INCOME_PAY_FLAG), ""),
            main_cust_name: normalize::to_string(raw.get(idx::MAIN_CUST_NAME), ""),
            main_cust_id: normalize::to_string(raw.get(idx::MAIN_CUST_ID), ""),
            main_cust_industry: normalize::to_string(raw.get(idx::MAIN_CUST_INDUSTRY), ""),
            main_cust_gender: normalize::to_string(raw.get(idx::MAIN_CUST_GENDER), ""),
            main_cust_open_date: normalize::to_string(raw.get(idx::MAIN_CUST_OPEN_DATE), ""),
            main_cust_addr: normalize::to_string(raw.get(idx::MAIN_CUST_ADDR), ""),
            main_cust_phone_number: normalize::to_string(raw.get(idx::MAIN_CUST_PHONE_NUMBER), ""),
            id_type: normalize::to_string(raw.get(idx::ID_TYPE), ""),
            id_number: normalize::to_string(raw.get(idx::ID_NUMBER), ""),
            model_name: normalize::to_string(raw.get(idx::MODEL_NAME), ""),
            highest_score: normalize::opt_string(raw.get(idx::HIGHEST_SCORE)),
            serial_num: normalize::opt_string(raw.get(idx::SERIAL_NUM)),
            features: normalize::opt_string(raw.get(idx::FEATURES)),
            feature_value: normalize::opt_string(raw.get(idx::FEATURE_VALUE)),
        })
    }

    /// Dedup identity of this row across the whole run.
    pub fn composite_key(&self) -> String {
        format!("{}_{}", self.case_id, self.trans_key)
    }
}

/// Composite keys already seen during one pipeline run.
#[derive(Debug, Default)]
pub struct DedupSet {
    seen: HashSet<String>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Record a key; false when it was already present.
    fn insert(&mut self, key: String) -> bool {
        self.seen.insert(key)
    }
}

/// Outcome counts for one processed chunk.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChunkStats {
    pub read: usize,
    pub dropped_unidentified: usize,
    pub dropped_duplicate: usize,
}

/// Map, normalize, and dedup one bounded batch of raw records.
/// Surviving rows are returned in input order; `seen` is updated with
/// their keys so later chunks drop repeats.
pub fn process_chunk(rows: &[RawRow], seen: &mut DedupSet) -> (Vec<TransactionRow>, ChunkStats) {
    let mut stats = ChunkStats {
        read: rows.len(),
        ..Default::default()
    };
    let mut out = Vec::with_capacity(rows.len());
    for raw in rows {
        let Some(row) = TransactionRow::from_raw(raw) else {
            stats.dropped_unidentified += 1;
            continue;
        };
        if !seen.insert(row.composite_key()) {
            stats.dropped_duplicate += 1;
            continue;
        }
        out.push(row);
    }
    if stats.dropped_unidentified > 0 || stats.dropped_duplicate > 0 {
        log::debug!(
            "chunk processed: {} read, {} unidentified dropped, {} duplicates dropped",
            stats.read,
            stats.dropped_unidentified,
            stats.dropped_duplicate
        );
    }
    (out, stats)
}
