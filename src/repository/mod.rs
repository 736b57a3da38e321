// ==========================================
// 版权结算对账系统 - 数据仓储层
// ==========================================
// 职责: 数据访问，不含业务逻辑
// 技术: rusqlite（共享连接 Arc<Mutex<Connection>>）
// ==========================================

pub mod catalog_repo;
pub mod deal_repo;
pub mod error;
pub mod import_batch_repo;
pub mod ledger_repo;
pub mod payment_repo;
pub mod statement_repo;
pub mod usage_repo;

// 重导出核心类型
pub use catalog_repo::CatalogRepository;
pub use deal_repo::DealRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use import_batch_repo::ImportBatchRepository;
pub use ledger_repo::LedgerRepository;
pub use payment_repo::PaymentRepository;
pub use statement_repo::{AllocationInput, StatementDates, StatementRepository};
pub use usage_repo::UsageRepository;

use rusqlite::types::{Type, ValueRef};
use rust_decimal::Decimal;
use std::str::FromStr;

/// 枚举列解码（无法识别的值报转换错误，而不是静默兜底）
pub(crate) fn decode_enum<T>(
    idx: usize,
    raw: String,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("无法识别的枚举值: {}", raw).into(),
        )
    })
}

/// 金额列编码（十进制文本）
pub(crate) fn encode_decimal(amount: Decimal) -> String {
    amount.to_string()
}

/// 金额列解码（兼容旧库中的 REAL/INTEGER 值）
pub(crate) fn decode_decimal(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let conversion = |ty: Type, msg: String| rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into());
    match row.get_ref(idx)? {
        ValueRef::Text(bytes) => {
            let raw = std::str::from_utf8(bytes).map_err(|e| conversion(Type::Text, e.to_string()))?;
            Decimal::from_str(raw.trim()).map_err(|e| conversion(Type::Text, format!("无效金额 {}: {}", raw, e)))
        }
        ValueRef::Integer(v) => Ok(Decimal::from(v)),
        ValueRef::Real(v) => Decimal::try_from(v).map_err(|e| conversion(Type::Real, e.to_string())),
        ValueRef::Null => Err(conversion(Type::Null, "金额不能为空".to_string())),
        ValueRef::Blob(_) => Err(conversion(Type::Blob, "金额不能为二进制".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decimal_column_round_trips_text_and_legacy_real() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a TEXT, b REAL, c INTEGER)").unwrap();
        conn.execute(
            "INSERT INTO t (a, b, c) VALUES (?1, 2.5, 7)",
            [encode_decimal(dec!(1250.10))],
        )
        .unwrap();
        let (a, b, c) = conn
            .query_row("SELECT a, b, c FROM t", [], |row| {
                Ok((decode_decimal(row, 0)?, decode_decimal(row, 1)?, decode_decimal(row, 2)?))
            })
            .unwrap();
        assert_eq!(a, dec!(1250.10));
        assert_eq!(b, dec!(2.5));
        assert_eq!(c, dec!(7));
    }
}
