// ==========================================
// 版权结算对账系统 - 金额与币种精度
// ==========================================
// 金额一律为 Decimal，累加精确
// 零值判定: 按币种精度四舍五入后为 0（即半个最小单位以内）
// ==========================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// 币种小数位数（ISO 4217 常见币种）
pub fn currency_decimals(currency: &str) -> u32 {
    match currency.trim().to_uppercase().as_str() {
        "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "UGX" | "XAF" | "XOF" => 0,
        "BHD" | "KWD" | "OMR" | "JOD" | "TND" | "IQD" | "LYD" => 3,
        _ => 2,
    }
}

/// 按币种精度四舍五入（0.5 远离零）
pub fn round_amount(amount: Decimal, currency: &str) -> Decimal {
    amount.round_dp_with_strategy(currency_decimals(currency), RoundingStrategy::MidpointAwayFromZero)
}

/// 金额在该币种精度下是否为零
pub fn is_zero_amount(amount: Decimal, currency: &str) -> bool {
    round_amount(amount, currency).is_zero()
}

/// 校验金额非负
pub fn check_non_negative(field: &str, amount: Decimal) -> Result<(), String> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(format!("{} 不能为负数: {}", field, amount));
    }
    Ok(())
}

/// 解析金额文本（支持科学计数法）
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// 整数值（有小数部分时为 None）
pub fn to_whole(amount: Decimal) -> Option<i64> {
    if amount.fract().is_zero() {
        amount.to_i64()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_depends_on_currency() {
        assert!(is_zero_amount(dec!(0.004), "USD"));
        assert!(!is_zero_amount(dec!(0.005), "USD"));
        assert!(is_zero_amount(dec!(-0.004), "USD"));
        assert!(is_zero_amount(dec!(0.4), "JPY"));
        assert!(!is_zero_amount(dec!(0.004), "KWD"));
    }

    #[test]
    fn test_round_amount() {
        assert_eq!(round_amount(dec!(10.005), "EUR"), dec!(10.01));
        assert_eq!(round_amount(dec!(-10.005), "EUR"), dec!(-10.01));
        assert_eq!(round_amount(dec!(10.6), "jpy"), dec!(11));
    }

    #[test]
    fn test_exact_sums() {
        let total: Decimal = [dec!(0.1), dec!(0.2)].iter().sum();
        assert_eq!(total, dec!(0.3));
        assert_eq!(dec!(0.3) - dec!(0.1) - dec!(0.2), Decimal::ZERO);
    }

    #[test]
    fn test_check_non_negative() {
        assert!(check_non_negative("debit", Decimal::ZERO).is_ok());
        assert!(check_non_negative("debit", dec!(-1)).is_err());
    }

    #[test]
    fn test_parse_decimal_and_whole() {
        assert_eq!(parse_decimal(" 1250.00 "), Some(dec!(1250.00)));
        assert_eq!(parse_decimal("1.5e2"), Some(dec!(150)));
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(to_whole(dec!(4.0)), Some(4));
        assert_eq!(to_whole(dec!(4.5)), None);
    }
}
