// ==========================================
// 版权结算对账系统 - 合约只读视图
// ==========================================
// 职责: 台账所需的合约属性（默认回收桶/交叉抵扣/版税阶梯）
// 说明: 合约元数据由外部协作方维护，此处只承载台账计算需要的字段
// ==========================================

use crate::domain::money::round_amount;
use crate::domain::types::{Bucket, DealStatus};
use crate::domain::usage::UsageRecord;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// 版税阶梯
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateEscalation {
    pub threshold_units: i64, // 累计数量达到该阈值后适用
    pub rate: Decimal,        // 百分比 [0, 100]
}

/// 有序版税阶梯（配置时校验，使用时不再解析）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscalationSchedule(Vec<RateEscalation>);

impl EscalationSchedule {
    /// 构造并校验: 阈值严格递增且非负，费率在 [0,100]
    pub fn new(tiers: Vec<RateEscalation>) -> Result<Self, String> {
        let mut previous: Option<i64> = None;
        for tier in &tiers {
            if tier.threshold_units < 0 {
                return Err(format!("阶梯阈值不能为负数: {}", tier.threshold_units));
            }
            if !is_percentage(tier.rate) {
                return Err(format!("阶梯费率超出 [0,100]: {}", tier.rate));
            }
            if let Some(prev) = previous {
                if tier.threshold_units <= prev {
                    return Err(format!(
                        "阶梯阈值必须严格递增: {} 之后出现 {}",
                        prev, tier.threshold_units
                    ));
                }
            }
            previous = Some(tier.threshold_units);
        }
        Ok(Self(tiers))
    }

    pub fn tiers(&self) -> &[RateEscalation] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ==========================================
// Deal - 合约
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub deal_id: i64,
    pub party_id: i64,
    pub name: String,
    pub status: DealStatus,
    pub default_bucket: Bucket,
    pub cross_collateralize: bool,
    pub royalty_rate: Decimal, // 基础费率（百分比）
    pub escalations: EscalationSchedule,
}

impl Deal {
    /// 校验合约配置
    pub fn validate(&self) -> Result<(), String> {
        if !is_percentage(self.royalty_rate) {
            return Err(format!("版税费率超出 [0,100]: {}", self.royalty_rate));
        }
        if self.name.trim().is_empty() {
            return Err("合约名称不能为空".to_string());
        }
        Ok(())
    }

    /// 按累计数量取适用费率（最后一个已达到的阶梯，未达到则为基础费率）
    pub fn effective_rate(&self, units_to_date: i64) -> Decimal {
        self.escalations
            .tiers()
            .iter()
            .take_while(|tier| units_to_date >= tier.threshold_units)
            .last()
            .map(|tier| tier.rate)
            .unwrap_or(self.royalty_rate)
    }

    /// 一条使用明细应计版税（净额 × 适用费率，按币种精度舍入）
    pub fn royalty_for(&self, usage: &UsageRecord, units_to_date: i64) -> Decimal {
        round_amount(
            usage.net_amount() * self.effective_rate(units_to_date) / Decimal::ONE_HUNDRED,
            &usage.currency,
        )
    }
}

fn is_percentage(rate: Decimal) -> bool {
    rate >= Decimal::ZERO && rate <= Decimal::ONE_HUNDRED
}

// ==========================================
// 预付款过账请求
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancePosting {
    pub advance_id: i64,
    pub deal_id: i64,
    pub bucket: Option<Bucket>, // 缺省取合约默认桶
    pub amount: Decimal,
    pub paid_date: NaiveDate,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn deal_with(tiers: Vec<RateEscalation>) -> Deal {
        Deal {
            deal_id: 1,
            party_id: 10,
            name: "Album Deal".to_string(),
            status: DealStatus::Active,
            default_bucket: Bucket::Recording,
            cross_collateralize: false,
            royalty_rate: dec!(15),
            escalations: EscalationSchedule::new(tiers).unwrap(),
        }
    }

    #[test]
    fn test_effective_rate_walks_tiers() {
        let deal = deal_with(vec![
            RateEscalation { threshold_units: 1_000, rate: dec!(18) },
            RateEscalation { threshold_units: 5_000, rate: dec!(20) },
        ]);
        assert_eq!(deal.effective_rate(0), dec!(15));
        assert_eq!(deal.effective_rate(999), dec!(15));
        assert_eq!(deal.effective_rate(1_000), dec!(18));
        assert_eq!(deal.effective_rate(10_000), dec!(20));
    }

    #[test]
    fn test_escalation_schedule_rejects_unordered() {
        let err = EscalationSchedule::new(vec![
            RateEscalation { threshold_units: 500, rate: dec!(18) },
            RateEscalation { threshold_units: 500, rate: dec!(20) },
        ]);
        assert!(err.is_err());
        assert!(EscalationSchedule::new(vec![RateEscalation { threshold_units: 1, rate: dec!(120) }]).is_err());
    }

    #[test]
    fn test_escalation_schedule_serde_is_plain_list() {
        let schedule =
            EscalationSchedule::new(vec![RateEscalation { threshold_units: 100, rate: dec!(16.5) }]).unwrap();
        let json = serde_json::to_string(&schedule).unwrap();
        assert_eq!(json, r#"[{"threshold_units":100,"rate":"16.5"}]"#);
    }
}
