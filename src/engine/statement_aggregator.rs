// ==========================================
// 版权结算对账系统 - 结算单汇总引擎
// ==========================================
// 公式:
// - gross/fee/net = 有效使用明细的总额/费用/净额之和
// - recouped = 来源为本结算单的台账分录 Σcredit - Σdebit
// - payable = net - recouped + manual_adjustment
// - paid = 付款状态 ∈ {POSTED, RECONCILED} 的分配之和
// - balance_due = payable - paid
// 状态机: DRAFT → PROCESSING → SENT → APPROVED → PAID，
//         非 PAID 可取消，任意非 DRAFT 可显式重置为 DRAFT
// 红线: 合计在输入写入后同步重算，不做惰性缓存
// ==========================================

use crate::domain::ledger::{LedgerEntry, LedgerSource};
use crate::domain::money::is_zero_amount;
use crate::domain::statement::{NewStatement, Statement, StatementTotals};
use crate::domain::types::StatementState;
use crate::domain::usage::UsageRecord;
use crate::error::{AppError, AppResult};
use crate::repository::{AllocationInput, LedgerRepository, StatementDates, StatementRepository, UsageRepository};
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

// ==========================================
// 纯函数: 合计计算
// ==========================================

/// 由输入计算结算单合计（相同输入必得相同输出）
pub fn compute_totals(
    usage_lines: &[UsageRecord],
    recoup_entries: &[LedgerEntry],
    allocations: &[AllocationInput],
    manual_adjustment: Decimal,
) -> StatementTotals {
    let active = || usage_lines.iter().filter(|l| l.active);
    let gross_total: Decimal = active().map(|l| l.gross_amount).sum();
    let fee_total: Decimal = active().map(|l| l.fees).sum();
    let net_total: Decimal = active().map(|l| l.net_amount()).sum();

    let recouped_amount: Decimal = recoup_entries.iter().map(|e| e.credit).sum::<Decimal>()
        - recoup_entries.iter().map(|e| e.debit).sum::<Decimal>();

    let payable = net_total - recouped_amount + manual_adjustment;

    let paid_amount: Decimal = allocations
        .iter()
        .filter(|a| a.payment_state.counts_as_paid())
        .map(|a| a.amount)
        .sum();

    StatementTotals {
        gross_total,
        fee_total,
        net_total,
        manual_adjustment,
        recouped_amount,
        payable,
        paid_amount,
        balance_due: payable - paid_amount,
    }
}

/// 合计变化后应进入的状态（None 表示不变）
///
/// 仅对已进入付款跟踪的结算单生效:
/// - 余额为零 → PAID（补记付款日）
/// - 已 PAID 但余额非零 → APPROVED（清除付款日）
fn auto_transition(statement: &Statement, today: NaiveDate) -> Option<(StatementState, Option<NaiveDate>)> {
    if !statement.state.tracks_payment() {
        return None;
    }
    let settled = is_zero_amount(statement.totals.balance_due, &statement.currency);
    match (settled, statement.state) {
        (true, StatementState::Paid) => None,
        (true, _) => Some((StatementState::Paid, Some(statement.paid_date.unwrap_or(today)))),
        (false, StatementState::Paid) => Some((StatementState::Approved, None)),
        (false, _) => None,
    }
}

// ==========================================
// StatementAggregator
// ==========================================
pub struct StatementAggregator {
    statement_repo: Arc<StatementRepository>,
}

impl StatementAggregator {
    pub fn new(statement_repo: Arc<StatementRepository>) -> Self {
        Self { statement_repo }
    }

    /// 在事务内重算合计并执行自动状态切换
    pub fn recompute_tx(conn: &Connection, statement_id: i64) -> AppResult<Statement> {
        let mut statement = StatementRepository::find_by_id_tx(conn, statement_id)?;
        let lines = UsageRepository::list_by_statement_tx(conn, statement_id)?;
        let entries = LedgerRepository::list_by_source_tx(conn, LedgerSource::Statement(statement_id))?;
        let allocations = StatementRepository::list_allocations_tx(conn, statement_id)?;

        let totals = compute_totals(&lines, &entries, &allocations, statement.manual_adjustment());
        StatementRepository::update_totals_tx(conn, statement_id, &totals, lines.len() as i64)?;
        statement.totals = totals;
        statement.usage_line_count = lines.len() as i64;

        if let Some((next, paid_date)) = auto_transition(&statement, Utc::now().date_naive()) {
            let dates = StatementDates {
                sent_date: statement.sent_date,
                approved_date: statement.approved_date,
                paid_date,
            };
            StatementRepository::update_state_tx(conn, statement_id, next, dates)?;
            UsageRepository::set_processed_for_statement_tx(conn, statement_id, next.marks_usage_processed())?;
            info!(
                statement_id = statement_id,
                from = %statement.state,
                to = %next,
                balance_due = %statement.totals.balance_due,
                "结算单自动状态切换"
            );
            statement.state = next;
            statement.paid_date = paid_date;
        }

        debug!(statement_id = statement_id, payable = %totals.payable, balance_due = %totals.balance_due, "结算单合计已重算");
        Ok(statement)
    }

    /// 重算（独立事务）
    pub fn recompute(&self, statement_id: i64) -> AppResult<Statement> {
        let conn = self.statement_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let statement = Self::recompute_tx(&tx, statement_id)?;
        tx.commit()?;
        Ok(statement)
    }

    pub fn get(&self, statement_id: i64) -> AppResult<Statement> {
        Ok(self.statement_repo.find_by_id(statement_id)?)
    }

    /// 新建草稿结算单
    pub fn create(&self, req: &NewStatement) -> AppResult<Statement> {
        req.validate().map_err(AppError::Validation)?;
        let conn = self.statement_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let statement_id = StatementRepository::insert_tx(&tx, req)?;
        let statement = Self::recompute_tx(&tx, statement_id)?;
        tx.commit()?;
        info!(statement_id = statement_id, reference = %statement.reference, "结算单已创建");
        Ok(statement)
    }

    // ==========================================
    // 使用明细挂载
    // ==========================================

    /// 挂载使用明细（仅 DRAFT/PROCESSING）
    ///
    /// 一条明细同一时间只属于一个结算单:
    /// - 已挂在其他未取消结算单上 → Precondition
    /// - 挂在已取消结算单上 → 自动摘下后挂载
    pub fn attach_usage(&self, statement_id: i64, usage_ids: &[i64]) -> AppResult<Statement> {
        let conn = self.statement_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let statement = StatementRepository::find_by_id_tx(&tx, statement_id)?;
        if !statement.state.accepts_usage_changes() {
            return Err(AppError::precondition(format!(
                "结算单 {} 状态为 {}，不能挂载明细",
                statement.reference, statement.state
            )));
        }

        let mut released: Vec<i64> = Vec::new();
        for usage_id in usage_ids {
            let usage = UsageRepository::find_by_id_tx(&tx, *usage_id)?;
            if !usage.active {
                return Err(AppError::precondition(format!("使用明细 {} 已停用", usage_id)));
            }
            match usage.statement_id {
                Some(current) if current == statement_id => continue,
                Some(other) => {
                    let owner = StatementRepository::find_by_id_tx(&tx, other)?;
                    if owner.state != StatementState::Cancelled {
                        return Err(AppError::precondition(format!(
                            "使用明细 {} 已属于结算单 {}",
                            usage_id, owner.reference
                        )));
                    }
                    released.push(other);
                }
                None => {}
            }
            UsageRepository::set_statement_tx(
                &tx,
                *usage_id,
                Some(statement_id),
                statement.state.marks_usage_processed(),
            )?;
        }

        released.sort_unstable();
        released.dedup();
        for other in released {
            Self::recompute_tx(&tx, other)?;
        }
        let statement = Self::recompute_tx(&tx, statement_id)?;
        tx.commit()?;
        info!(statement_id = statement_id, lines = usage_ids.len(), "使用明细已挂载");
        Ok(statement)
    }

    /// 摘下使用明细（仅 DRAFT/PROCESSING）
    pub fn detach_usage(&self, statement_id: i64, usage_ids: &[i64]) -> AppResult<Statement> {
        let conn = self.statement_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let statement = StatementRepository::find_by_id_tx(&tx, statement_id)?;
        if !statement.state.accepts_usage_changes() {
            return Err(AppError::precondition(format!(
                "结算单 {} 状态为 {}，不能摘下明细",
                statement.reference, statement.state
            )));
        }
        for usage_id in usage_ids {
            let usage = UsageRepository::find_by_id_tx(&tx, *usage_id)?;
            if usage.statement_id != Some(statement_id) {
                return Err(AppError::validation(format!(
                    "使用明细 {} 不属于结算单 {}",
                    usage_id, statement.reference
                )));
            }
            UsageRepository::set_statement_tx(&tx, *usage_id, None, false)?;
        }

        let statement = Self::recompute_tx(&tx, statement_id)?;
        tx.commit()?;
        Ok(statement)
    }

    /// 设置人工调整金额（可为负）
    pub fn set_manual_adjustment(&self, statement_id: i64, amount: Decimal) -> AppResult<Statement> {
        let conn = self.statement_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let statement = StatementRepository::find_by_id_tx(&tx, statement_id)?;
        if statement.state == StatementState::Cancelled {
            return Err(AppError::precondition(format!("结算单 {} 已取消", statement.reference)));
        }
        StatementRepository::set_manual_adjustment_tx(&tx, statement_id, amount)?;
        let statement = Self::recompute_tx(&tx, statement_id)?;
        tx.commit()?;
        Ok(statement)
    }

    // ==========================================
    // 状态切换
    // ==========================================

    fn transition(
        &self,
        statement_id: i64,
        action: &str,
        allowed: fn(StatementState) -> bool,
        target: StatementState,
        dates: impl FnOnce(&Statement, NaiveDate) -> StatementDates,
    ) -> AppResult<Statement> {
        let conn = self.statement_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let current = StatementRepository::find_by_id_tx(&tx, statement_id)?;
        if !allowed(current.state) {
            return Err(AppError::precondition(format!(
                "结算单 {} 当前状态 {}，不能{}",
                current.reference, current.state, action
            )));
        }

        let today = Utc::now().date_naive();
        StatementRepository::update_state_tx(&tx, statement_id, target, dates(&current, today))?;
        UsageRepository::set_processed_for_statement_tx(&tx, statement_id, target.marks_usage_processed())?;
        let statement = Self::recompute_tx(&tx, statement_id)?;
        tx.commit()?;

        info!(statement_id = statement_id, from = %current.state, to = %statement.state, "结算单{}", action);
        Ok(statement)
    }

    pub fn mark_processing(&self, statement_id: i64) -> AppResult<Statement> {
        self.transition(
            statement_id,
            "开始处理",
            |s| s == StatementState::Draft,
            StatementState::Processing,
            |s, _| StatementDates {
                sent_date: s.sent_date,
                approved_date: s.approved_date,
                paid_date: s.paid_date,
            },
        )
    }

    pub fn mark_sent(&self, statement_id: i64) -> AppResult<Statement> {
        self.transition(
            statement_id,
            "发送",
            |s| s == StatementState::Processing,
            StatementState::Sent,
            |s, today| StatementDates {
                sent_date: Some(today),
                approved_date: s.approved_date,
                paid_date: s.paid_date,
            },
        )
    }

    pub fn mark_approved(&self, statement_id: i64) -> AppResult<Statement> {
        self.transition(
            statement_id,
            "审批",
            |s| s == StatementState::Sent,
            StatementState::Approved,
            |s, today| StatementDates {
                sent_date: s.sent_date,
                approved_date: Some(today),
                paid_date: s.paid_date,
            },
        )
    }

    /// 手工标记已付（余额必须为零）
    pub fn mark_paid(&self, statement_id: i64) -> AppResult<Statement> {
        let conn = self.statement_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let current = StatementRepository::find_by_id_tx(&tx, statement_id)?;
        if matches!(current.state, StatementState::Draft | StatementState::Cancelled) {
            return Err(AppError::precondition(format!(
                "结算单 {} 当前状态 {}，不能标记已付",
                current.reference, current.state
            )));
        }
        // 重算会在余额为零时自动切换到 PAID
        let statement = Self::recompute_tx(&tx, statement_id)?;
        if statement.state != StatementState::Paid {
            return Err(AppError::precondition(format!(
                "结算单 {} 尚有未付余额 {:.2}",
                statement.reference, statement.totals.balance_due
            )));
        }
        tx.commit()?;
        Ok(statement)
    }

    pub fn cancel(&self, statement_id: i64) -> AppResult<Statement> {
        self.transition(
            statement_id,
            "取消",
            |s| !matches!(s, StatementState::Paid | StatementState::Cancelled),
            StatementState::Cancelled,
            |s, _| StatementDates {
                sent_date: s.sent_date,
                approved_date: s.approved_date,
                paid_date: None,
            },
        )
    }

    /// 显式重置为草稿（清除发送/审批/付款日期）
    pub fn reset_to_draft(&self, statement_id: i64) -> AppResult<Statement> {
        self.transition(
            statement_id,
            "重置为草稿",
            |s| s != StatementState::Draft,
            StatementState::Draft,
            |_, _| StatementDates::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Bucket, PaymentState, SourceType};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn line(gross: Decimal, fees: Decimal) -> UsageRecord {
        let mut r = UsageRecord::reported(
            SourceType::Distributor,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            "Blue Moon",
            "The Tides",
        );
        r.gross_amount = gross;
        r.fees = fees;
        r
    }

    fn entry(debit: Decimal, credit: Decimal) -> LedgerEntry {
        LedgerEntry {
            entry_id: 1,
            party_id: 1,
            deal_id: None,
            bucket: Bucket::Recording,
            entry_date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            description: "Recoup".to_string(),
            debit,
            credit,
            balance: Decimal::ZERO,
            source: LedgerSource::Statement(1),
            transfer_id: None,
            created_at: Utc::now(),
        }
    }

    fn alloc(amount: Decimal, state: PaymentState) -> AllocationInput {
        AllocationInput { amount, payment_state: state }
    }

    #[test]
    fn test_single_line_payable() {
        let totals = compute_totals(&[line(dec!(100), dec!(10))], &[], &[], Decimal::ZERO);
        assert_eq!(totals.gross_total, dec!(100));
        assert_eq!(totals.fee_total, dec!(10));
        assert_eq!(totals.net_total, dec!(90));
        assert_eq!(totals.payable, dec!(90));
        assert_eq!(totals.balance_due, dec!(90));
    }

    #[test]
    fn test_totals_are_idempotent() {
        let lines = vec![line(dec!(100), dec!(10)), line(dec!(40), dec!(5))];
        let entries = vec![entry(Decimal::ZERO, dec!(30))];
        let allocations = vec![alloc(dec!(20), PaymentState::Posted)];
        let first = compute_totals(&lines, &entries, &allocations, dec!(5));
        let second = compute_totals(&lines, &entries, &allocations, dec!(5));
        assert_eq!(first, second);
        assert_eq!(first.payable, dec!(125) - dec!(30) + dec!(5));
        assert_eq!(first.balance_due, dec!(80));
    }

    #[test]
    fn test_only_posted_and_reconciled_allocations_count() {
        let allocations = vec![
            alloc(dec!(10), PaymentState::Draft),
            alloc(dec!(20), PaymentState::Posted),
            alloc(dec!(30), PaymentState::Reconciled),
            alloc(dec!(40), PaymentState::Cancelled),
        ];
        let totals = compute_totals(&[line(dec!(100), Decimal::ZERO)], &[], &allocations, Decimal::ZERO);
        assert_eq!(totals.paid_amount, dec!(50));
    }

    #[test]
    fn test_adding_a_line_changes_only_dependent_totals() {
        let allocations = vec![alloc(dec!(20), PaymentState::Posted)];
        let before = compute_totals(&[line(dec!(100), dec!(10))], &[], &allocations, Decimal::ZERO);
        let after = compute_totals(&[line(dec!(100), dec!(10)), line(dec!(10), Decimal::ZERO)], &[], &allocations, Decimal::ZERO);
        assert_eq!(before.paid_amount, after.paid_amount);
        assert_eq!(before.recouped_amount, after.recouped_amount);
        assert_eq!(after.net_total - before.net_total, dec!(10));
        assert_eq!(after.balance_due - before.balance_due, dec!(10));
    }

    #[test]
    fn test_inactive_lines_are_ignored() {
        let mut gone = line(dec!(50), Decimal::ZERO);
        gone.active = false;
        let totals = compute_totals(&[line(dec!(100), dec!(10)), gone], &[], &[], Decimal::ZERO);
        assert_eq!(totals.gross_total, dec!(100));
    }

    #[test]
    fn test_cent_amounts_settle_exactly() {
        let lines = vec![line(dec!(0.10), Decimal::ZERO), line(dec!(0.20), Decimal::ZERO)];
        let allocations = vec![alloc(dec!(0.30), PaymentState::Posted)];
        let totals = compute_totals(&lines, &[], &allocations, Decimal::ZERO);
        assert_eq!(totals.net_total, dec!(0.30));
        assert!(totals.balance_due.is_zero());
    }
}
