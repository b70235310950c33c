//! Positional input schema for transaction extracts.
//!
//! RULE: source files carry no header row — column ORDER is the
//! contract. The i-th cell of every record is the i-th attribute in
//! [`COLUMNS`]. Rows shorter than the table resolve missing trailing
//! attributes to null; extra trailing cells are ignored. Absence is a
//! value here, never an error.

/// Bump when the upstream extract changes its column order.
pub const SCHEMA_VERSION: u32 = 1;

/// One source column: the label the upstream extract uses and the
/// canonical attribute name used everywhere in this crate.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub label: &'static str,
    pub name: &'static str,
}

/// The version-1 position table. Positions are load-bearing: the
/// `idx` constants below must stay in sync (checked by tests).
pub const COLUMNS: &[Column] = &[
    Column { label: "案例编号", name: "case_id" },
    Column { label: "数据日期", name: "data_date" },
    Column { label: "主客户编号", name: "main_cust_id" },
    Column { label: "主客户名称", name: "main_cust_name" },
    Column { label: "证件类型", name: "id_type" },
    Column { label: "证件号", name: "id_number" },
    Column { label: "主客户职业行业", name: "main_cust_industry" },
    Column { label: "主客户性别", name: "main_cust_gender" },
    Column { label: "主客户开户日期", name: "main_cust_open_date" },
    Column { label: "主客户地址", name: "main_cust_addr" },
    Column { label: "主客户联系电话", name: "main_cust_phone_number" },
    Column { label: "可疑模型编号", name: "model_id" },
    Column { label: "可疑模型名称", name: "model_name" },
    Column { label: "可疑特征规则编号", name: "suspect_rule_id" },
    Column { label: "可疑特征规则特征名称", name: "suspect_rule_name" },
    Column { label: "模型平台最高分数", name: "highest_score" },
    Column { label: "机器学习匹配规则前10特征序号", name: "serial_num" },
    Column { label: "机器学习匹配规则前10特征说明", name: "features" },
    Column { label: "机器学习匹配规则前10特征风险值", name: "feature_value" },
    Column { label: "可疑案例下所有客户号", name: "all_case_cust_ids" },
    Column { label: "可疑案例下所有客户名称", name: "all_case_cust_names" },
    Column { label: "可疑案例下所有账号", name: "all_case_acct_nos" },
    Column { label: "交易主键", name: "trans_key" },
    Column { label: "交易日期", name: "trans_date" },
    Column { label: "交易日期和时间", name: "trans_datetime" },
    Column { label: "交易机构", name: "trans_org" },
    Column { label: "客户类型", name: "cust_type" },
    Column { label: "卡号折号", name: "card_no" },
    Column { label: "卡片类型", name: "card_type" },
    Column { label: "am1交易渠道", name: "aml_channel" },
    Column { label: "源系统交易渠道", name: "src_channel" },
    Column { label: "am1交易代码", name: "aml_trans_code" },
    Column { label: "源系统交易代码", name: "src_trans_code" },
    Column { label: "现转标志", name: "cash_transfer_flag" },
    Column { label: "借贷标志", name: "debit_credit_flag" },
    Column { label: "收付标志", name: "income_pay_flag" },
    Column { label: "币种", name: "currency" },
    Column { label: "原币种交易金额", name: "trans_amt" },
    Column { label: "折人民币交易金额", name: "cny_amt" },
    Column { label: "折美元交易金额", name: "usd_amt" },
    Column { label: "交易余额", name: "trans_balance" },
    Column { label: "交易发生国家", name: "trans_country" },
    Column { label: "交易发生地区", name: "trans_region" },
    Column { label: "资金用途和来源", name: "fund_usage" },
    Column { label: "对方名称", name: "counterparty_name" },
    Column { label: "对方账号", name: "counterparty_acct_no" },
    Column { label: "对手PBC账户类型", name: "pbc_acct_type" },
    Column { label: "对方是否我行客户", name: "is_our_cust" },
    Column { label: "对方客户编号", name: "counterparty_cust_id" },
    Column { label: "对方客户类型", name: "counterparty_cust_type" },
    Column { label: "对方卡号折号", name: "counterparty_card_no" },
    Column { label: "对方金融机构编号", name: "fin_inst_id" },
    Column { label: "对方金融机构名称", name: "fin_inst_name" },
    Column { label: "对方金融机构网点国家", name: "fin_inst_country" },
    Column { label: "对方金融机构网点地区", name: "fin_inst_region" },
    Column { label: "交易去向国家", name: "fund_dest_country" },
    Column { label: "交易去向地区", name: "fund_dest_region" },
    Column { label: "交易IPV6地址", name: "ipv6_addr" },
    Column { label: "IP地址", name: "ip_addr" },
    Column { label: "交易MAC地址", name: "mac_addr" },
    Column { label: "摘要码", name: "summary_code" },
    Column { label: "交易备注", name: "trans_remark" },
];

/// Positions of the attributes the engine actually consumes.
pub mod idx {
    pub const CASE_ID: usize = 0;
    pub const MAIN_CUST_ID: usize = 2;
    pub const MAIN_CUST_NAME: usize = 3;
    pub const ID_TYPE: usize = 4;
    pub const ID_NUMBER: usize = 5;
    pub const MAIN_CUST_INDUSTRY: usize = 6;
    pub const MAIN_CUST_GENDER: usize = 7;
    pub const MAIN_CUST_OPEN_DATE: usize = 8;
    pub const MAIN_CUST_ADDR: usize = 9;
    pub const MAIN_CUST_PHONE_NUMBER: usize = 10;
    pub const MODEL_NAME: usize = 12;
    pub const HIGHEST_SCORE: usize = 15;
    pub const SERIAL_NUM: usize = 16;
    pub const FEATURES: usize = 17;
    pub const FEATURE_VALUE: usize = 18;
    pub const TRANS_KEY: usize = 22;
    pub const TRANS_DATETIME: usize = 24;
    pub const TRANS_ORG: usize = 25;
    pub const AML_CHANNEL: usize = 29;
    pub const SRC_CHANNEL: usize = 30;
    pub const INCOME_PAY_FLAG: usize = 35;
    pub const CURRENCY: usize = 36;
    pub const TRANS_AMT: usize = 37;
    pub const TRANS_REGION: usize = 42;
    pub const FUND_USAGE: usize = 43;
    pub const COUNTERPARTY_NAME: usize = 44;
    pub const IP_ADDR: usize = 58;
    pub const MAC_ADDR: usize = 59;
    pub const TRANS_REMARK: usize = 61;
}

/// Attributes a run cannot proceed without. The check is run-level
/// and structural: the first record must be wide enough to ever
/// contain them. Per-row absence stays a value.
pub const REQUIRED: &[(usize, &str)] = &[
    (idx::CASE_ID, "case_id"),
    (idx::MAIN_CUST_NAME, "main_cust_name"),
    (idx::TRANS_AMT, "trans_amt"),
    (idx::TRANS_DATETIME, "trans_datetime"),
];

/// Record width needed to cover every required attribute.
pub fn required_width() -> usize {
    REQUIRED.iter().map(|(i, _)| i + 1).max().unwrap_or(0)
}

/// One record's cells, addressed by schema position.
#[derive(Debug, Clone)]
pub struct RawRow {
    cells: Vec<String>,
}

impl RawRow {
    pub fn new(cells: Vec<String>) -> Self {
        Self { cells }
    }

    pub fn width(&self) -> usize {
        self.cells.len()
    }

    /// Cell at `position`, trimmed. Past-the-end positions and cells
    /// that are empty after trimming both come back as None — the
    /// mapper's null, before any token interpretation (that is the
    /// normalizer's job).
    pub fn get(&self, position: usize) -> Option<&str> {
        match self.cells.get(position) {
            Some(cell) => {
                let trimmed = cell.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed)
                }
            }
            None => None,
        }
    }
}
