// ==========================================
// 版权结算对账系统 - API 入参解析
// ==========================================
// 职责: 协作方传入的字符串 → 领域类型
// 红线: 解析失败一律返回 InvalidInput，不写入任何数据
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::ledger::parse_entry_date;
use crate::domain::types::{Bucket, PaymentMethod, SourceType, UsageType};
use chrono::NaiveDate;
use rust_decimal::Decimal;

pub fn parse_date(field: &str, raw: &str) -> ApiResult<NaiveDate> {
    parse_entry_date(raw).map_err(|e| ApiError::InvalidInput(format!("{}: {}", field, e)))
}

pub fn parse_optional_date(field: &str, raw: Option<&str>) -> ApiResult<Option<NaiveDate>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_date(field, value).map(Some),
    }
}

/// 通用枚举解析
fn parse_enum<T>(field: &str, raw: &str, parse: fn(&str) -> Option<T>) -> ApiResult<T> {
    parse(raw).ok_or_else(|| ApiError::InvalidInput(format!("{} 取值无效: {}", field, raw.trim())))
}

pub fn parse_bucket(raw: &str) -> ApiResult<Bucket> {
    parse_enum("bucket", raw, Bucket::parse)
}

pub fn parse_source_type(raw: &str) -> ApiResult<SourceType> {
    parse_enum("source_type", raw, SourceType::parse)
}

pub fn parse_usage_type(raw: &str) -> ApiResult<UsageType> {
    parse_enum("usage_type", raw, UsageType::parse)
}

pub fn parse_payment_method(raw: &str) -> ApiResult<PaymentMethod> {
    parse_enum("method", raw, PaymentMethod::parse)
}

/// 金额: 非负
pub fn parse_amount(field: &str, value: Decimal) -> ApiResult<Decimal> {
    if value < Decimal::ZERO {
        return Err(ApiError::InvalidInput(format!("{} 必须为非负数: {}", field, value)));
    }
    Ok(value)
}

/// 分隔符: 单个字符（`\t` 与 "tab" 均表示制表符）
pub fn parse_delimiter(raw: &str) -> ApiResult<u8> {
    match raw {
        "\\t" | "\t" => return Ok(b'\t'),
        other if other.eq_ignore_ascii_case("tab") => return Ok(b'\t'),
        _ => {}
    }
    match raw.as_bytes() {
        [b] => Ok(*b),
        _ => Err(ApiError::InvalidInput(format!("分隔符必须为单个字符: {:?}", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_date_rejects_malformed() {
        assert!(parse_date("entry_date", "2024-02-30").is_err());
        assert_eq!(
            parse_date("entry_date", " 2024-02-29 ").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert_eq!(parse_optional_date("as_of", Some("")).unwrap(), None);
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!(parse_bucket("tour-support").unwrap(), Bucket::TourSupport);
        assert!(matches!(parse_bucket("misc"), Err(ApiError::InvalidInput(_))));
        assert_eq!(parse_payment_method("wire").unwrap(), PaymentMethod::Wire);
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert_eq!(parse_delimiter("\\t").unwrap(), b'\t');
        assert_eq!(parse_delimiter("TAB").unwrap(), b'\t');
        assert!(parse_delimiter(";;").is_err());
    }

    #[test]
    fn test_parse_amount() {
        assert!(parse_amount("amount", dec!(-1)).is_err());
        assert_eq!(parse_amount("amount", dec!(12.50)).unwrap(), dec!(12.5));
        assert_eq!(parse_amount("amount", Decimal::ZERO).unwrap(), Decimal::ZERO);
    }
}
