// ==========================================
// 版权结算对账系统 - 使用明细 (UsageRecord)
// ==========================================
// 职责: 外部报表中的一条使用记录
// 红线: 净额 = 总额 - 费用，只从输入推导，不单独存储
// 生命周期: 导入创建 → 匹配/人工修正 → 挂载结算单
//           已进入定稿结算单的记录只能软删除
// ==========================================

use crate::domain::catalog::CatalogEntity;
use crate::domain::money::check_non_negative;
use crate::domain::types::{MatchState, SourceType, UsageType};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// UsageRecord - 使用明细
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    // ===== 主键 =====
    pub usage_id: i64, // 未落库时为 0

    // ===== 来源 =====
    pub source_type: SourceType,
    pub source_reference: Option<String>,
    pub import_batch_id: Option<String>,

    // ===== 报告期 =====
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,

    // ===== 报告内容 =====
    pub territory_code: Option<String>,
    pub service_name: Option<String>,
    pub track_name: String,
    pub artist_name: String,
    pub album_name: Option<String>,
    pub isrc: Option<String>,
    pub iswc: Option<String>,
    pub upc: Option<String>,
    pub usage_type: UsageType,

    // ===== 数量与金额 =====
    pub units: i64,
    pub gross_amount: Decimal,
    pub fees: Decimal,
    pub currency: String,
    pub exchange_rate: Decimal,

    // ===== 匹配结果 =====
    pub match_state: MatchState,
    pub confidence: f64,
    pub recording_id: Option<i64>,
    pub work_id: Option<i64>,

    // ===== 结算 =====
    pub statement_id: Option<i64>,
    pub processed: bool,
    pub active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    /// 构造一条未落库的报告记录（其余字段取默认值）
    pub fn reported(
        source_type: SourceType,
        period_start: NaiveDate,
        period_end: NaiveDate,
        track_name: impl Into<String>,
        artist_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            usage_id: 0,
            source_type,
            source_reference: None,
            import_batch_id: None,
            period_start,
            period_end,
            territory_code: None,
            service_name: None,
            track_name: track_name.into(),
            artist_name: artist_name.into(),
            album_name: None,
            isrc: None,
            iswc: None,
            upc: None,
            usage_type: UsageType::Stream,
            units: 0,
            gross_amount: Decimal::ZERO,
            fees: Decimal::ZERO,
            currency: "USD".to_string(),
            exchange_rate: Decimal::ONE,
            match_state: MatchState::Unmatched,
            confidence: 0.0,
            recording_id: None,
            work_id: None,
            statement_id: None,
            processed: false,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// 净额（报告币种）
    pub fn net_amount(&self) -> Decimal {
        self.gross_amount - self.fees
    }

    /// 净额（公司本位币）
    pub fn net_amount_company(&self) -> Decimal {
        self.net_amount() * self.exchange_rate
    }

    pub fn is_locked(&self) -> bool {
        self.match_state == MatchState::Locked
    }

    /// 当前匹配到的实体（录音优先）
    pub fn matched_entity(&self) -> Option<CatalogEntity> {
        self.recording_id
            .map(CatalogEntity::Recording)
            .or(self.work_id.map(CatalogEntity::Work))
    }

    /// 去重键
    pub fn duplicate_key(&self) -> UsageDuplicateKey {
        UsageDuplicateKey {
            source_type: self.source_type,
            period_start: self.period_start,
            period_end: self.period_end,
            track_name: self.track_name.trim().to_string(),
            artist_name: self.artist_name.trim().to_string(),
            isrc: self.isrc.clone().unwrap_or_default(),
        }
    }

    /// 字段级校验（写入前调用）
    pub fn validate(&self) -> Result<(), String> {
        if self.period_end < self.period_start {
            return Err(format!(
                "报告期结束日 {} 早于开始日 {}",
                self.period_end, self.period_start
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("匹配置信度超出 [0,1]: {}", self.confidence));
        }
        if self.units < 0 {
            return Err(format!("数量不能为负数: {}", self.units));
        }
        check_non_negative("gross_amount", self.gross_amount)?;
        check_non_negative("fees", self.fees)?;
        if self.exchange_rate <= Decimal::ZERO {
            return Err(format!("汇率必须大于 0: {}", self.exchange_rate));
        }
        if self.track_name.trim().is_empty() || self.artist_name.trim().is_empty() {
            return Err("曲目名与艺人名不能为空".to_string());
        }
        Ok(())
    }
}

// ==========================================
// 去重键: (来源类型, 报告期, 曲目, 艺人, ISRC)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageDuplicateKey {
    pub source_type: SourceType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub track_name: String,
    pub artist_name: String,
    pub isrc: String, // 无 ISRC 时为空串
}

// ==========================================
// 批量自动匹配统计
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStats {
    pub processed: usize,
    pub matched: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> UsageRecord {
        let mut r = UsageRecord::reported(
            SourceType::Distributor,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            "Blue Moon",
            "The Tides",
        );
        r.gross_amount = dec!(100);
        r.fees = dec!(10);
        r
    }

    #[test]
    fn test_net_amount_is_derived() {
        let mut r = sample();
        assert_eq!(r.net_amount(), dec!(90));
        r.fees = dec!(25);
        assert_eq!(r.net_amount(), dec!(75));
        r.exchange_rate = dec!(2);
        assert_eq!(r.net_amount_company(), dec!(150));
        r.exchange_rate = Decimal::ZERO;
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_period() {
        let mut r = sample();
        r.period_end = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_confidence() {
        let mut r = sample();
        r.confidence = 1.2;
        assert!(r.validate().is_err());
        r.confidence = 0.8;
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_duplicate_key_trims_text() {
        let a = sample();
        let mut b = sample();
        b.track_name = " Blue Moon ".to_string();
        assert_eq!(a.duplicate_key(), b.duplicate_key());
    }
}
