// ==========================================
// 版权结算对账系统 - 重算管线
// ==========================================
// 依赖方向（显式调用，不依赖隐式联动）:
//   使用明细变更 / 台账分录变更 → 结算单合计重算 → 付款分配检查
// 说明: 所有函数接收事务内连接，由调用方负责提交
// ==========================================

use crate::domain::ledger::LedgerSource;
use crate::domain::money::is_zero_amount;
use crate::domain::statement::Statement;
use crate::engine::statement_aggregator::StatementAggregator;
use crate::error::AppResult;
use rusqlite::Connection;
use tracing::{debug, warn};

/// 去重并保持升序
fn distinct(ids: impl IntoIterator<Item = i64>) -> Vec<i64> {
    let mut ids: Vec<i64> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn recompute_all(conn: &Connection, statement_ids: Vec<i64>) -> AppResult<Vec<Statement>> {
    statement_ids
        .into_iter()
        .map(|id| StatementAggregator::recompute_tx(conn, id))
        .collect()
}

/// 使用明细（金额/挂载/停用）变更后
///
/// # 参数
/// - statement_ids: 变更前后涉及的结算单（允许重复）
pub fn after_usage_change_tx(
    conn: &Connection,
    statement_ids: impl IntoIterator<Item = i64>,
) -> AppResult<Vec<Statement>> {
    let ids = distinct(statement_ids);
    debug!(statements = ?ids, "使用明细变更，重算结算单");
    recompute_all(conn, ids)
}

/// 台账分录变更后: 来源为结算单的分录影响该结算单的回收额
pub fn after_ledger_change_tx(
    conn: &Connection,
    sources: impl IntoIterator<Item = LedgerSource>,
) -> AppResult<Vec<Statement>> {
    let ids = distinct(sources.into_iter().filter_map(|s| s.statement_id()));
    if !ids.is_empty() {
        debug!(statements = ?ids, "台账分录变更，重算结算单");
    }
    recompute_all(conn, ids)
}

/// 付款状态或分配变更后
pub fn after_payment_change_tx(
    conn: &Connection,
    statement_ids: impl IntoIterator<Item = i64>,
) -> AppResult<Vec<Statement>> {
    let ids = distinct(statement_ids);
    let statements = recompute_all(conn, ids)?;
    for s in &statements {
        if s.totals.balance_due.is_sign_negative() && !is_zero_amount(s.totals.balance_due, &s.currency) {
            warn!(
                statement_id = s.statement_id,
                balance_due = %s.totals.balance_due,
                "结算单超额付款"
            );
        }
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_sorts_and_dedups() {
        assert_eq!(distinct(vec![3, 1, 3, 2, 1]), vec![1, 2, 3]);
        assert!(distinct(Vec::new()).is_empty());
    }

    #[test]
    fn test_ledger_change_without_statement_sources_is_noop() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        let touched = after_ledger_change_tx(
            &conn,
            vec![LedgerSource::Advance(1), LedgerSource::UsageLine(2), LedgerSource::None],
        )
        .unwrap();
        assert!(touched.is_empty());
    }
}
