// ==========================================
// 版权结算对账系统 - 使用明细维护
// ==========================================
// 职责: 金额更正 / 删除 / 按导入批次撤销
// 删除规则: 属于定稿结算单或已被台账引用 → 软删除（停用）
//           其余 → 物理删除
// 每次变更后显式触发结算单重算
// ==========================================

use crate::domain::ledger::LedgerSource;
use crate::domain::money::check_non_negative;
use crate::domain::usage::UsageRecord;
use crate::engine::recalc;
use crate::error::{AppError, AppResult};
use crate::repository::{LedgerRepository, StatementRepository, UsageRepository};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// 删除结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalOutcome {
    pub deleted: usize,
    pub deactivated: usize,
}

pub struct UsageService {
    usage_repo: Arc<UsageRepository>,
}

impl UsageService {
    pub fn new(usage_repo: Arc<UsageRepository>) -> Self {
        Self { usage_repo }
    }

    /// 更正金额（已处理的明细不可修改）
    pub fn correct_amounts(&self, usage_id: i64, gross: Decimal, fees: Decimal) -> AppResult<UsageRecord> {
        check_non_negative("gross_amount", gross).map_err(AppError::Validation)?;
        check_non_negative("fees", fees).map_err(AppError::Validation)?;

        let conn = self.usage_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let record = UsageRepository::find_by_id_tx(&tx, usage_id)?;
        if record.processed {
            return Err(AppError::precondition(format!(
                "使用明细 {} 已进入处理中的结算单，不能修改金额",
                usage_id
            )));
        }
        if !record.active {
            return Err(AppError::precondition(format!("使用明细 {} 已停用", usage_id)));
        }

        UsageRepository::update_amounts_tx(&tx, usage_id, gross, fees)?;
        recalc::after_usage_change_tx(&tx, record.statement_id)?;
        let updated = UsageRepository::find_by_id_tx(&tx, usage_id)?;
        tx.commit()?;

        info!(usage_id = usage_id, gross = %gross, fees = %fees, net = %updated.net_amount(), "使用明细金额已更正");
        Ok(updated)
    }

    /// 删除单条明细
    pub fn remove_usage(&self, usage_id: i64) -> AppResult<RemovalOutcome> {
        let conn = self.usage_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let record = UsageRepository::find_by_id_tx(&tx, usage_id)?;
        let mut outcome = RemovalOutcome::default();
        Self::remove_tx(&tx, &record, &mut outcome)?;
        recalc::after_usage_change_tx(&tx, record.statement_id)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// 撤销整个导入批次
    pub fn undo_batch(&self, batch_id: &str) -> AppResult<RemovalOutcome> {
        let conn = self.usage_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let records = UsageRepository::list_by_batch_tx(&tx, batch_id)?;
        if records.is_empty() {
            return Err(AppError::not_found("ImportBatch", batch_id));
        }

        let mut outcome = RemovalOutcome::default();
        for record in &records {
            Self::remove_tx(&tx, record, &mut outcome)?;
        }
        recalc::after_usage_change_tx(&tx, records.iter().filter_map(|r| r.statement_id))?;
        tx.commit()?;

        info!(
            batch_id = batch_id,
            deleted = outcome.deleted,
            deactivated = outcome.deactivated,
            "导入批次已撤销"
        );
        Ok(outcome)
    }

    fn remove_tx(conn: &Connection, record: &UsageRecord, outcome: &mut RemovalOutcome) -> AppResult<()> {
        if !record.active {
            return Ok(());
        }
        let finalized = match record.statement_id {
            Some(statement_id) => StatementRepository::find_by_id_tx(conn, statement_id)?
                .state
                .marks_usage_processed(),
            None => false,
        };
        let referenced = !LedgerRepository::list_by_source_tx(conn, LedgerSource::UsageLine(record.usage_id))?.is_empty();

        if finalized || referenced {
            UsageRepository::deactivate_tx(conn, record.usage_id)?;
            outcome.deactivated += 1;
        } else {
            UsageRepository::delete_tx(conn, record.usage_id)?;
            outcome.deleted += 1;
        }
        Ok(())
    }
}
