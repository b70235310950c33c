//! Case aggregation — collapses one case's transaction rows into a
//! single risk profile.
//!
//! RULE: signals are additive and independent. Each keyword check
//! reads the rows on its own terms; no check may abort another. A
//! failure here is case-level and the pipeline skips just that case.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::chunk::TransactionRow;
use crate::error::{TaskError, TaskResult};
use crate::normalize;

// ── Signal thresholds ──────────────────────────────────────────

const HIGH_FREQUENCY_MIN_ROWS: usize = 50;
const SMALL_AMOUNT_AVG_MAX: f64 = 10.0;
const NIGHT_RATIO_THRESHOLD: f64 = 0.8;
const INTEGER_RATIO_THRESHOLD: f64 = 0.7;
const ROUND_AMOUNT_RATIO_THRESHOLD: f64 = 0.5;
const IP_DISPERSION_THRESHOLD: f64 = 0.5;
const MAC_DISPERSION_THRESHOLD: f64 = 0.3;
const ANONYMOUS_RATIO_THRESHOLD: f64 = 0.5;

const SAMPLE_HEAD_TAIL: usize = 3;
const TOP_VALUES_LIMIT: usize = 5;
const TOP_ADDR_LIMIT: usize = 10;
const COUNTERPARTY_SAMPLE_LIMIT: usize = 20;
const REPORT_LEAD_DAYS: i64 = 7;

// ── Keyword tags ───────────────────────────────────────────────

const KW_SMALL_AMOUNT: &str = "small-amount";
const KW_HIGH_FREQUENCY: &str = "high-frequency";
const KW_NIGHT_TIME: &str = "night-time";
const KW_HIGH_INTEGER_RATIO: &str = "high-integer-ratio";
const KW_ROUND_AMOUNT: &str = "round-amount";
const KW_IP_DISPERSED: &str = "ip-dispersed";
const KW_DEVICE_DISPERSED: &str = "device-dispersed";
const KW_ANONYMOUS: &str = "anonymous-counterparty";
const KW_SUSPICIOUS_PURPOSE: &str = "suspicious-purpose";

// ── Match sets (patterns are stored lowercase) ─────────────────

/// fund_usage substrings marking a suspicious purpose.
const SUSPICIOUS_PURPOSE_PATTERNS: &[&str] = &[
    "充值", "返现", "游戏", "彩票", "recharge", "cashback", "gaming", "lottery",
];

/// fund_usage substrings feeding the gambling-suspicion flag.
const GAMBLING_PURPOSE_PATTERNS: &[&str] = &["充值", "返现", "recharge", "cashback"];

/// fund_usage substrings for low-value/automatic traffic, excluded
/// from the representative sample.
const LOW_VALUE_KEYWORDS: &[&str] = &[
    "扣费", "手续费", "服务费", "系统", "自动", "代扣", "短信费", "管理费", "工本费",
];

/// Counterparty-name substrings treated as institutional/fee traffic,
/// excluded from the counterparty sample.
const INSTITUTIONAL_COUNTERPARTY_KEYWORDS: &[&str] = &[
    "手续费", "服务费", "系统", "自动", "结算", "财付通", "微信", "支付宝", "银联",
    "代扣", "平台", "科技", "银行",
];

const DEBIT_FLAGS: &[&str] = &["1", "01", "借", "debit", "D"];
const CREDIT_FLAGS: &[&str] = &["2", "02", "贷", "credit", "C"];

/// Canonical output column order. Every successful run emits exactly
/// these columns; uncomputed values render as empty strings.
pub const OUTPUT_COLUMNS: &[&str] = &[
    "case_id",
    "main_cust_name",
    "main_cust_id",
    "main_cust_industry",
    "main_cust_gender",
    "main_cust_open_date",
    "main_cust_addr",
    "main_cust_phone_number",
    "id_type",
    "id_number",
    "total_trans_amt",
    "trans_count",
    "avg_trans_amt",
    "max_trans_amt",
    "first_trans_date",
    "last_trans_date",
    "report_start_date",
    "report_end_date",
    "night_trans_count",
    "risk_keywords",
    "counterparty_sample",
    "top_opposing_areas",
    "main_tnx_channels",
    "sample_trx_list",
    "debit_count",
    "debit_amt",
    "credit_count",
    "credit_amt",
    "model_name",
    "is_network_gambling_suspected",
    "tr_org",
    "features",
    "highest_score",
    "top_ip_addrs",
    "top_mac_addrs",
];

/// One representative transaction, serialized into the
/// `sample_trx_list` cell. Field names are the downstream report
/// contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleTrx {
    #[serde(rename = "TR_DT")]
    pub tr_dt: String,
    #[serde(rename = "TR_TM")]
    pub tr_tm: String,
    #[serde(rename = "TR_AMT")]
    pub tr_amt: f64,
    #[serde(rename = "CURR_CD")]
    pub curr_cd: String,
    #[serde(rename = "OPP_NAME")]
    pub opp_name: String,
    #[serde(rename = "FUND_USE")]
    pub fund_use: String,
    #[serde(rename = "TR_CHNL")]
    pub tr_chnl: String,
    #[serde(rename = "TR_AREA")]
    pub tr_area: String,
    #[serde(rename = "SRC_CHNL")]
    pub src_chnl: String,
    #[serde(rename = "TR_ORG")]
    pub tr_org: String,
    #[serde(rename = "REMARK")]
    pub remark: String,
}

/// One de-duplicated machine-learning feature record, serialized into
/// the `features` cell. Raw cell values; null stays null.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRecord {
    pub serial_num: Option<String>,
    pub features: Option<String>,
    pub feature_value: Option<String>,
    pub highest_score: Option<String>,
}

/// One aggregated output record. Created in one pass per case; never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct CaseRiskProfile {
    pub case_id: String,
    pub main_cust_name: String,
    pub main_cust_id: String,
    pub main_cust_industry: String,
    pub main_cust_gender: String,
    pub main_cust_open_date: String,
    pub main_cust_addr: String,
    pub main_cust_phone_number: String,
    pub id_type: String,
    pub id_number: String,
    pub total_trans_amt: f64,
    pub trans_count: usize,
    pub avg_trans_amt: f64,
    pub max_trans_amt: f64,
    pub first_trans_date: String,
    pub last_trans_date: String,
    pub report_start_date: String,
    pub report_end_date: String,
    pub night_trans_count: usize,
    pub risk_keywords: String,
    pub counterparty_sample: String,
    pub top_opposing_areas: String,
    pub main_tnx_channels: String,
    pub sample_trx_list: Vec<SampleTrx>,
    pub debit_count: usize,
    pub debit_amt: f64,
    pub credit_count: usize,
    pub credit_amt: f64,
    pub model_name: String,
    pub is_network_gambling_suspected: String,
    pub tr_org: String,
    pub features: Vec<FeatureRecord>,
    pub highest_score: f64,
    pub top_ip_addrs: String,
    pub top_mac_addrs: String,
}

impl CaseRiskProfile {
    /// Render this profile as one output record in [`OUTPUT_COLUMNS`]
    /// order. Embedded lists serialize as JSON within their cell.
    pub fn to_record(&self) -> TaskResult<Vec<String>> {
        let sample_json = serde_json::to_string(&self.sample_trx_list)?;
        let features_json = serde_json::to_string(&self.features)?;
        Ok(vec![
            self.case_id.clone(),
            self.main_cust_name.clone(),
            self.main_cust_id.clone(),
            self.main_cust_industry.clone(),
            self.main_cust_gender.clone(),
            self.main_cust_open_date.clone(),
            self.main_cust_addr.clone(),
            self.main_cust_phone_number.clone(),
            self.id_type.clone(),
            self.id_number.clone(),
            self.total_trans_amt.to_string(),
            self.trans_count.to_string(),
            self.avg_trans_amt.to_string(),
            self.max_trans_amt.to_string(),
            self.first_trans_date.clone(),
            self.last_trans_date.clone(),
            self.report_start_date.clone(),
            self.report_end_date.clone(),
            self.night_trans_count.to_string(),
            self.risk_keywords.clone(),
            self.counterparty_sample.clone(),
            self.top_opposing_areas.clone(),
            self.main_tnx_channels.clone(),
            sample_json,
            self.debit_count.to_string(),
            self.debit_amt.to_string(),
            self.credit_count.to_string(),
            self.credit_amt.to_string(),
            self.model_name.clone(),
            self.is_network_gambling_suspected.clone(),
            self.tr_org.clone(),
            features_json,
            self.highest_score.to_string(),
            self.top_ip_addrs.clone(),
            self.top_mac_addrs.clone(),
        ])
    }
}

/// Aggregate the complete, deduplicated row set of one case.
///
/// An empty row set is an upstream bug and surfaces as an error so the
/// pipeline skips the case instead of emitting a hollow record.
pub fn aggregate_case(case_id: &str, rows: &[TransactionRow]) -> TaskResult<CaseRiskProfile> {
    if rows.is_empty() {
        return Err(TaskError::CaseAggregation {
            case_id: case_id.to_string(),
            reason: "no rows accumulated".to_string(),
        });
    }
    let trans_count = rows.len();

    // Night activity is measured over rows with a parsed hour only.
    let valid_hours: Vec<u32> = rows.iter().filter_map(|r| r.hour).collect();
    let night_count = valid_hours.iter().filter(|&&h| h >= 23 || h <= 6).count();
    let night_ratio = if valid_hours.is_empty() {
        0.0
    } else {
        night_count as f64 / valid_hours.len() as f64
    };

    // Amount statistics run over parsed amounts only; null amounts
    // count toward trans_count but never toward an average.
    let amounts: Vec<f64> = rows.iter().filter_map(|r| r.trans_amt).collect();
    let total_trans_amt: f64 = amounts.iter().sum();
    let avg_trans_amt = if amounts.is_empty() {
        0.0
    } else {
        total_trans_amt / amounts.len() as f64
    };
    let max_trans_amt = amounts.iter().copied().reduce(f64::max).unwrap_or(0.0);

    let distinct_ips: HashSet<&str> = rows.iter().filter_map(|r| r.ip_addr.as_deref()).collect();
    let distinct_macs: HashSet<&str> = rows.iter().filter_map(|r| r.mac_addr.as_deref()).collect();
    let ip_dispersed = distinct_ips.len() as f64 / trans_count as f64 > IP_DISPERSION_THRESHOLD;
    let mac_dispersed = distinct_macs.len() as f64 / trans_count as f64 > MAC_DISPERSION_THRESHOLD;

    let mut keywords: BTreeSet<&'static str> = BTreeSet::new();
    if avg_trans_amt <= SMALL_AMOUNT_AVG_MAX {
        keywords.insert(KW_SMALL_AMOUNT);
    }
    if trans_count >= HIGH_FREQUENCY_MIN_ROWS {
        keywords.insert(KW_HIGH_FREQUENCY);
    }
    if !valid_hours.is_empty() && night_ratio > NIGHT_RATIO_THRESHOLD {
        keywords.insert(KW_NIGHT_TIME);
    }
    let integer_count = amounts.iter().filter(|a| a.fract() == 0.0).count();
    if !amounts.is_empty()
        && integer_count as f64 / amounts.len() as f64 > INTEGER_RATIO_THRESHOLD
    {
        keywords.insert(KW_HIGH_INTEGER_RATIO);
    }
    let round_count = amounts.iter().filter(|&&a| is_round_amount(a)).count();
    if !amounts.is_empty()
        && round_count as f64 / amounts.len() as f64 > ROUND_AMOUNT_RATIO_THRESHOLD
    {
        keywords.insert(KW_ROUND_AMOUNT);
    }
    if ip_dispersed {
        keywords.insert(KW_IP_DISPERSED);
    }
    if mac_dispersed {
        keywords.insert(KW_DEVICE_DISPERSED);
    }
    let missing_counterparty = rows.iter().filter(|r| r.counterparty_name.is_none()).count();
    if missing_counterparty as f64 > trans_count as f64 * ANONYMOUS_RATIO_THRESHOLD {
        keywords.insert(KW_ANONYMOUS);
    }
    if rows
        .iter()
        .any(|r| matches_any(r.fund_usage.as_deref(), SUSPICIOUS_PURPOSE_PATTERNS))
    {
        keywords.insert(KW_SUSPICIOUS_PURPOSE);
    }

    let sample_trx_list = build_sample(rows);
    let top_opposing_areas = top_values(
        rows.iter().map(|r| r.trans_region.as_deref()),
        TOP_VALUES_LIMIT,
    );
    let main_tnx_channels = top_values(
        rows.iter().map(|r| r.aml_channel.as_deref()),
        TOP_VALUES_LIMIT,
    );
    let top_ip_addrs = top_values(rows.iter().map(|r| r.ip_addr.as_deref()), TOP_ADDR_LIMIT);
    let top_mac_addrs = top_values(rows.iter().map(|r| r.mac_addr.as_deref()), TOP_ADDR_LIMIT);

    let mut debit_count = 0usize;
    let mut debit_amt = 0.0;
    let mut credit_count = 0usize;
    let mut credit_amt = 0.0;
    for row in rows {
        let flag = row.income_pay_flag.as_str();
        if DEBIT_FLAGS.contains(&flag) {
            debit_count += 1;
            debit_amt += row.trans_amt.unwrap_or(0.0);
        } else if CREDIT_FLAGS.contains(&flag) {
            credit_count += 1;
            credit_amt += row.trans_amt.unwrap_or(0.0);
        }
    }

    let gambling_purpose = rows
        .iter()
        .any(|r| matches_any(r.fund_usage.as_deref(), GAMBLING_PURPOSE_PATTERNS));
    let suspected = (trans_count >= HIGH_FREQUENCY_MIN_ROWS
        && avg_trans_amt <= SMALL_AMOUNT_AVG_MAX
        && !valid_hours.is_empty()
        && night_ratio > NIGHT_RATIO_THRESHOLD
        && gambling_purpose)
        || ip_dispersed
        || mac_dispersed;

    let first_date: Option<NaiveDate> = rows.iter().filter_map(|r| r.trans_date).min();
    let last_date: Option<NaiveDate> = rows.iter().filter_map(|r| r.trans_date).max();

    let head = &rows[0];
    Ok(CaseRiskProfile {
        case_id: case_id.to_string(),
        main_cust_name: head.main_cust_name.clone(),
        main_cust_id: head.main_cust_id.clone(),
        main_cust_industry: head.main_cust_industry.clone(),
        main_cust_gender: head.main_cust_gender.clone(),
        main_cust_open_date: head.main_cust_open_date.clone(),
        main_cust_addr: head.main_cust_addr.clone(),
        main_cust_phone_number: head.main_cust_phone_number.clone(),
        id_type: head.id_type.clone(),
        id_number: head.id_number.clone(),
        total_trans_amt,
        trans_count,
        avg_trans_amt,
        max_trans_amt,
        first_trans_date: normalize::format_opt_date(first_date, "%Y-%m-%d", ""),
        last_trans_date: normalize::format_opt_date(last_date, "%Y-%m-%d", ""),
        report_start_date: normalize::format_opt_date(
            first_date.map(|d| d - Duration::days(REPORT_LEAD_DAYS)),
            "%Y年%m月%d日",
            "",
        ),
        report_end_date: normalize::format_opt_date(last_date, "%Y年%m月%d日", ""),
        night_trans_count: night_count,
        risk_keywords: keywords.into_iter().collect::<Vec<_>>().join(","),
        counterparty_sample: counterparty_sample(rows),
        top_opposing_areas,
        main_tnx_channels,
        sample_trx_list,
        debit_count,
        debit_amt,
        credit_count,
        credit_amt,
        model_name: head.model_name.clone(),
        is_network_gambling_suspected: if suspected { "yes" } else { "no" }.to_string(),
        tr_org: head
            .trans_org
            .clone()
            .unwrap_or_else(|| "未知机构".to_string()),
        features: feature_records(rows),
        highest_score: normalize::to_float(head.highest_score.as_deref(), 0.0),
        top_ip_addrs,
        top_mac_addrs,
    })
}

/// Case-insensitive substring match against lowercase `patterns`.
fn matches_any(text: Option<&str>, patterns: &[&str]) -> bool {
    let Some(text) = text else { return false };
    let lowered = text.to_lowercase();
    patterns.iter().any(|p| lowered.contains(p))
}

/// Divisible by 100, 1000, or 10000.
fn is_round_amount(amount: f64) -> bool {
    [100.0, 1000.0, 10_000.0]
        .iter()
        .any(|d| amount % d == 0.0)
}

/// Representative sample: low-value/automatic traffic is dropped
/// (falling back to the full set if nothing survives), then the
/// earliest three rows (ascending) and latest three (descending) by
/// timestamp are concatenated and de-duplicated by exact timestamp,
/// keeping the first occurrence.
fn build_sample(rows: &[TransactionRow]) -> Vec<SampleTrx> {
    let filtered: Vec<&TransactionRow> = rows
        .iter()
        .filter(|r| !matches_any(r.fund_usage.as_deref(), LOW_VALUE_KEYWORDS))
        .collect();
    let pool: Vec<&TransactionRow> = if filtered.is_empty() {
        rows.iter().collect()
    } else {
        filtered
    };

    let mut dated: Vec<&TransactionRow> = pool
        .into_iter()
        .filter(|r| r.trans_datetime.is_some())
        .collect();
    if dated.is_empty() {
        return Vec::new();
    }
    dated.sort_by_key(|r| r.trans_datetime);

    let head = dated.iter().take(SAMPLE_HEAD_TAIL);
    let tail = dated.iter().rev().take(SAMPLE_HEAD_TAIL);
    let mut seen: HashSet<NaiveDateTime> = HashSet::new();
    let mut out = Vec::new();
    for row in head.chain(tail) {
        let Some(ts) = row.trans_datetime else {
            continue;
        };
        if !seen.insert(ts) {
            continue;
        }
        out.push(SampleTrx {
            tr_dt: normalize::format_opt_date(row.trans_date, "%Y-%m-%d", ""),
            tr_tm: normalize::format_opt_datetime(row.trans_datetime, "%H:%M", ""),
            tr_amt: row.trans_amt.unwrap_or(0.0),
            curr_cd: row.currency.clone().unwrap_or_else(|| "CNY".to_string()),
            opp_name: row.counterparty_name.clone().unwrap_or_default(),
            fund_use: row.fund_usage.clone().unwrap_or_default(),
            tr_chnl: row.aml_channel.clone().unwrap_or_default(),
            tr_area: row.trans_region.clone().unwrap_or_default(),
            src_chnl: row.src_channel.clone().unwrap_or_default(),
            tr_org: row.trans_org.clone().unwrap_or_default(),
            remark: row.trans_remark.clone().unwrap_or_default(),
        });
    }
    out
}

/// Most frequent non-null values, count-descending with first-seen
/// tie-break, comma-joined. Empty string when nothing qualifies.
fn top_values<'a, I>(values: I, limit: usize) -> String
where
    I: Iterator<Item = Option<&'a str>>,
{
    let mut counts: HashMap<&'a str, (usize, usize)> = HashMap::new();
    for (order, value) in values.flatten().enumerate() {
        let entry = counts.entry(value).or_insert((order, 0));
        entry.1 += 1;
    }
    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .1.cmp(&a.1 .1).then(a.1 .0.cmp(&b.1 .0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(value, _)| value)
        .collect::<Vec<_>>()
        .join(",")
}

/// Non-null counterparty names, institutional traffic excluded,
/// first-seen de-dup, capped, semicolon-joined.
fn counterparty_sample(rows: &[TransactionRow]) -> String {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut sample: Vec<&str> = Vec::new();
    for row in rows {
        let Some(name) = row.counterparty_name.as_deref() else {
            continue;
        };
        if INSTITUTIONAL_COUNTERPARTY_KEYWORDS
            .iter()
            .any(|kw| name.contains(kw))
        {
            continue;
        }
        if seen.insert(name) {
            sample.push(name);
            if sample.len() >= COUNTERPARTY_SAMPLE_LIMIT {
                break;
            }
        }
    }
    sample.join(";")
}

/// Rows carrying any machine-learning feature data become feature
/// records, de-duplicated by exact content in first-seen order.
fn feature_records(rows: &[TransactionRow]) -> Vec<FeatureRecord> {
    let mut records: Vec<FeatureRecord> = Vec::new();
    for row in rows {
        if row.serial_num.is_none()
            && row.features.is_none()
            && row.feature_value.is_none()
            && row.highest_score.is_none()
        {
            continue;
        }
        let record = FeatureRecord {
            serial_num: row.serial_num.clone(),
            features: row.features.clone(),
            feature_value: row.feature_value.clone(),
            highest_score: row.highest_score.clone(),
        };
        if !records.contains(&record) {
            records.push(record);
        }
    }
    records
}
