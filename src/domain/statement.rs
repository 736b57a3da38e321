// ==========================================
// 版权结算对账系统 - 结算单 (Statement)
// ==========================================
// 聚合根: 一个收款方 + 一个结算期
// 红线: 合计字段均为输入的纯函数，任一输入变化后同步重算
// ==========================================

use crate::domain::types::StatementState;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// StatementTotals - 结算单合计
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementTotals {
    pub gross_total: Decimal,
    pub fee_total: Decimal,
    pub net_total: Decimal,
    pub manual_adjustment: Decimal,
    pub recouped_amount: Decimal,
    pub payable: Decimal,     // net - recouped + adjustment
    pub paid_amount: Decimal, // 已过账/已对账付款分配之和
    pub balance_due: Decimal, // payable - paid
}

// ==========================================
// Statement - 结算单
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub statement_id: i64,
    pub reference: String, // RS/{年}/{序号}
    pub partner_id: i64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub currency: String,
    pub state: StatementState,

    // ===== 日期 =====
    pub statement_date: NaiveDate,
    pub due_date: NaiveDate,
    pub sent_date: Option<NaiveDate>,
    pub approved_date: Option<NaiveDate>,
    pub paid_date: Option<NaiveDate>,

    // ===== 合计 =====
    pub totals: StatementTotals,
    pub usage_line_count: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Statement {
    pub fn manual_adjustment(&self) -> Decimal {
        self.totals.manual_adjustment
    }
}

/// 结算单编号
pub fn statement_reference(statement_date: NaiveDate, statement_id: i64) -> String {
    use chrono::Datelike;
    format!("RS/{}/{:05}", statement_date.year(), statement_id)
}

// ==========================================
// 新建结算单请求
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStatement {
    pub partner_id: i64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub currency: String,
    pub statement_date: NaiveDate,
}

impl NewStatement {
    pub fn validate(&self) -> Result<(), String> {
        if self.period_end < self.period_start {
            return Err(format!(
                "结算期结束日 {} 早于开始日 {}",
                self.period_end, self.period_start
            ));
        }
        if self.currency.trim().len() != 3 {
            return Err(format!("币种代码无效: {}", self.currency));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_reference_format() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        assert_eq!(statement_reference(date, 42), "RS/2024/00042");
    }

    #[test]
    fn test_new_statement_validation() {
        let mut req = NewStatement {
            partner_id: 1,
            period_start: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            currency: "USD".to_string(),
            statement_date: NaiveDate::from_ymd_opt(2024, 7, 15).unwrap(),
        };
        assert!(req.validate().is_ok());
        req.period_end = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        assert!(req.validate().is_err());
    }
}
