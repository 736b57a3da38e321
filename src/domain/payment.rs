// ==========================================
// 版权结算对账系统 - 付款 (Payment / PaymentLine)
// ==========================================
// 红线: 一笔付款的所有分配行指向同一收款方的结算单
//       付款总额 = 分配金额之和（读取时推导）
// ==========================================

use crate::domain::types::{PaymentMethod, PaymentState};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// PaymentLine - 付款分配行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLine {
    pub line_id: i64,
    pub payment_id: i64,
    pub statement_id: i64,
    pub amount: Decimal, // > 0
}

// ==========================================
// Payment - 付款
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: i64,
    pub partner_id: Option<i64>, // 首次分配时推导
    pub payment_date: NaiveDate,
    pub method: PaymentMethod,
    pub state: PaymentState,
    pub memo: Option<String>,
    pub lines: Vec<PaymentLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// 付款总额
    pub fn amount_total(&self) -> Decimal {
        self.lines.iter().map(|l| l.amount).sum()
    }

    /// 分配涉及的结算单（去重，保持首次出现顺序）
    pub fn statement_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            if !ids.contains(&line.statement_id) {
                ids.push(line.statement_id);
            }
        }
        ids
    }
}

/// 分配金额校验（> 0）
pub fn check_allocation_amount(amount: Decimal) -> Result<(), String> {
    if amount <= Decimal::ZERO {
        return Err(format!("分配金额必须大于 0: {}", amount));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(id: i64, statement_id: i64, amount: Decimal) -> PaymentLine {
        PaymentLine { line_id: id, payment_id: 1, statement_id, amount }
    }

    #[test]
    fn test_amount_total_and_statement_ids() {
        let now = Utc::now();
        let payment = Payment {
            payment_id: 1,
            partner_id: Some(5),
            payment_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            method: PaymentMethod::Wire,
            state: PaymentState::Draft,
            memo: None,
            lines: vec![line(1, 7, dec!(100)), line(2, 8, dec!(50.5)), line(3, 7, dec!(20))],
            created_at: now,
            updated_at: now,
        };
        assert_eq!(payment.amount_total(), dec!(170.5));
        assert_eq!(payment.statement_ids(), vec![7, 8]);
    }

    #[test]
    fn test_check_allocation_amount() {
        assert!(check_allocation_amount(dec!(0.01)).is_ok());
        assert!(check_allocation_amount(Decimal::ZERO).is_err());
        assert!(check_allocation_amount(dec!(-3)).is_err());
    }
}
