// ==========================================
// 版权结算对账系统 - 回收台账分录 (LedgerEntry)
// ==========================================
// 红线: 同一 (party, bucket) 序列按 (日期, id) 升序，
//       balance[i] = balance[i-1] + debit[i] - credit[i]，首条之前余额为 0
// 借方 = 费用/预付（未回收余额增加），贷方 = 收益抵扣（余额减少）
// ==========================================

use crate::domain::money::check_non_negative;
use crate::domain::types::Bucket;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// 来源单据（有且仅有一种）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerSource {
    Advance(i64),
    UsageLine(i64),
    Statement(i64),
    None,
}

impl LedgerSource {
    /// 拆分为 (source_kind, source_id) 落库
    pub fn to_columns(&self) -> (&'static str, Option<i64>) {
        match self {
            LedgerSource::Advance(id) => ("ADVANCE", Some(*id)),
            LedgerSource::UsageLine(id) => ("USAGE_LINE", Some(*id)),
            LedgerSource::Statement(id) => ("STATEMENT", Some(*id)),
            LedgerSource::None => ("NONE", None),
        }
    }

    /// 从 (source_kind, source_id) 还原
    pub fn from_columns(kind: &str, id: Option<i64>) -> Result<Self, String> {
        match (kind, id) {
            ("ADVANCE", Some(id)) => Ok(LedgerSource::Advance(id)),
            ("USAGE_LINE", Some(id)) => Ok(LedgerSource::UsageLine(id)),
            ("STATEMENT", Some(id)) => Ok(LedgerSource::Statement(id)),
            ("NONE", _) => Ok(LedgerSource::None),
            (other, id) => Err(format!("未知来源单据: kind={}, id={:?}", other, id)),
        }
    }

    pub fn statement_id(&self) -> Option<i64> {
        match self {
            LedgerSource::Statement(id) => Some(*id),
            _ => None,
        }
    }
}

// ==========================================
// 序列键 (party, bucket)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub party_id: i64,
    pub bucket: Bucket,
}

impl SeriesKey {
    pub fn new(party_id: i64, bucket: Bucket) -> Self {
        Self { party_id, bucket }
    }
}

// ==========================================
// LedgerEntry - 台账分录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: i64,
    pub party_id: i64,
    pub deal_id: Option<i64>,
    pub bucket: Bucket,
    pub entry_date: NaiveDate,
    pub description: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub balance: Decimal, // 派生缓存
    pub source: LedgerSource,
    pub transfer_id: Option<String>, // 交叉抵扣配对标识
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.party_id, self.bucket)
    }

    /// 排序位置 (日期, id)
    pub fn position(&self) -> (NaiveDate, i64) {
        (self.entry_date, self.entry_id)
    }
}

// ==========================================
// NewLedgerEntry - 待过账分录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub party_id: i64,
    pub deal_id: Option<i64>,
    pub bucket: Bucket,
    pub entry_date: NaiveDate,
    pub description: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub source: LedgerSource,
    pub transfer_id: Option<String>,
}

impl NewLedgerEntry {
    pub fn debit(
        party_id: i64,
        bucket: Bucket,
        entry_date: NaiveDate,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            party_id,
            deal_id: None,
            bucket,
            entry_date,
            description: description.into(),
            debit: amount,
            credit: Decimal::ZERO,
            source: LedgerSource::None,
            transfer_id: None,
        }
    }

    pub fn credit(
        party_id: i64,
        bucket: Bucket,
        entry_date: NaiveDate,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            credit: amount,
            debit: Decimal::ZERO,
            ..Self::debit(party_id, bucket, entry_date, Decimal::ZERO, description)
        }
    }

    pub fn with_deal(mut self, deal_id: i64) -> Self {
        self.deal_id = Some(deal_id);
        self
    }

    pub fn with_source(mut self, source: LedgerSource) -> Self {
        self.source = source;
        self
    }

    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.party_id, self.bucket)
    }

    /// 过账前校验（不通过则不写入任何数据）
    pub fn validate(&self) -> Result<(), String> {
        check_amounts(self.debit, self.credit)?;
        if self.description.trim().is_empty() {
            return Err("分录摘要不能为空".to_string());
        }
        Ok(())
    }
}

/// 借贷金额校验: 非负且不同时为零
pub fn check_amounts(debit: Decimal, credit: Decimal) -> Result<(), String> {
    check_non_negative("debit", debit)?;
    check_non_negative("credit", credit)?;
    if debit.is_zero() && credit.is_zero() {
        return Err("借方与贷方不能同时为 0".to_string());
    }
    Ok(())
}

/// 解析分录日期（YYYY-MM-DD）
pub fn parse_entry_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| format!("日期格式错误: {}（期望 YYYY-MM-DD）: {}", raw.trim(), e))
}

// ==========================================
// LedgerEntryPatch - 分录修改
// ==========================================
// party/bucket 不可修改
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntryPatch {
    pub entry_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub debit: Option<Decimal>,
    pub credit: Option<Decimal>,
}

// ==========================================
// 交叉抵扣转账结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossTransfer {
    pub transfer_id: String,
    pub from_bucket: Bucket, // 正余额桶（被贷记）
    pub to_bucket: Bucket,   // 负余额桶（被借记）
    pub amount: Decimal,
    pub credit_entry_id: i64,
    pub debit_entry_id: i64,
}

// ==========================================
// 台账对账单（期初/明细/期末）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerStatement {
    pub party_id: i64,
    pub bucket: Bucket,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub opening_balance: Decimal,
    pub entries: Vec<LedgerEntry>,
    pub closing_balance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_source_columns_round_trip_single_case() {
        let src = LedgerSource::Statement(12);
        let (kind, id) = src.to_columns();
        assert_eq!(kind, "STATEMENT");
        assert_eq!(LedgerSource::from_columns(kind, id).unwrap(), src);
        assert_eq!(src.statement_id(), Some(12));
        assert_eq!(LedgerSource::Advance(3).statement_id(), None);
        assert!(LedgerSource::from_columns("ADVANCE", None).is_err());
    }

    #[test]
    fn test_new_entry_validation() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(NewLedgerEntry::debit(1, Bucket::Recording, date, dec!(500), "Advance")
            .validate()
            .is_ok());
        assert!(NewLedgerEntry::debit(1, Bucket::Recording, date, dec!(-5), "Advance")
            .validate()
            .is_err());
        assert!(NewLedgerEntry::credit(1, Bucket::Recording, date, Decimal::ZERO, "Nothing")
            .validate()
            .is_err());
        assert!(NewLedgerEntry::credit(1, Bucket::Recording, date, dec!(1), " ")
            .validate()
            .is_err());
    }

    #[test]
    fn test_parse_entry_date() {
        assert!(parse_entry_date("2024-02-30").is_err());
        assert_eq!(
            parse_entry_date(" 2024-02-29 ").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }
}
