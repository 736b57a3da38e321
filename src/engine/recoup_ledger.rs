// ==========================================
// 版权结算对账系统 - 回收台账引擎
// ==========================================
// 核心不变量: 同一 (party, bucket) 序列按 (date, id) 升序，
//   balance[i] = balance[i-1] + debit[i] - credit[i]，首条之前为 0
// 重算范围: 从插入/修改/删除位置（删除取旧日期）起的后缀
// 并发: 写入方按 (party, bucket) 串行（键级互斥），
//       后缀重算与触发写入在同一事务内完成
// ==========================================

use crate::domain::deal::{AdvancePosting, Deal};
use crate::domain::ledger::{
    check_amounts, CrossTransfer, LedgerEntry, LedgerEntryPatch, LedgerSource, LedgerStatement,
    NewLedgerEntry, SeriesKey,
};
use crate::domain::types::{Bucket, StatementState};
use crate::engine::events::{AccountingEvent, OptionalAccountingPoster};
use crate::engine::recalc;
use crate::engine::statement_aggregator::StatementAggregator;
use crate::error::{AppError, AppResult};
use crate::repository::{DealRepository, LedgerRepository, StatementRepository, UsageRepository};
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument};
use uuid::Uuid;

type SeriesLock = Arc<Mutex<()>>;

// ==========================================
// RecoupLedger
// ==========================================
pub struct RecoupLedger {
    ledger_repo: Arc<LedgerRepository>,
    poster: OptionalAccountingPoster,
    series_locks: Mutex<HashMap<SeriesKey, SeriesLock>>,
}

impl RecoupLedger {
    pub fn new(ledger_repo: Arc<LedgerRepository>, poster: OptionalAccountingPoster) -> Self {
        Self {
            ledger_repo,
            poster,
            series_locks: Mutex::new(HashMap::new()),
        }
    }

    // ==========================================
    // 键级互斥
    // ==========================================

    /// 取得序列锁句柄（按键排序，固定加锁顺序）
    fn lock_handles(&self, keys: &[SeriesKey]) -> AppResult<Vec<SeriesLock>> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();
        let mut map = self
            .series_locks
            .lock()
            .map_err(|e| AppError::Internal(format!("序列锁表获取失败: {}", e)))?;
        Ok(keys
            .into_iter()
            .map(|k| Arc::clone(map.entry(k).or_default()))
            .collect())
    }

    fn acquire(handles: &[SeriesLock]) -> AppResult<Vec<MutexGuard<'_, ()>>> {
        handles
            .iter()
            .map(|h| {
                h.lock()
                    .map_err(|e| AppError::Internal(format!("序列锁获取失败: {}", e)))
            })
            .collect()
    }

    // ==========================================
    // 后缀重算（纯折叠）
    // ==========================================

    /// 从 (date, id) 起重算序列余额，返回更新的分录数
    pub fn recompute_from_tx(conn: &Connection, key: SeriesKey, date: NaiveDate, entry_id: i64) -> AppResult<usize> {
        let mut running = LedgerRepository::sum_before_tx(conn, key, date, entry_id)?;
        let suffix = LedgerRepository::list_from_tx(conn, key, date, entry_id)?;
        let mut updated = 0;
        for entry in &suffix {
            running += entry.debit - entry.credit;
            if entry.balance != running {
                LedgerRepository::update_balance_tx(conn, entry.entry_id, running)?;
                updated += 1;
            }
        }
        debug!(
            party_id = key.party_id,
            bucket = %key.bucket,
            from = %date,
            scanned = suffix.len(),
            updated = updated,
            "台账余额后缀重算"
        );
        Ok(updated)
    }

    /// 插入分录并重算（事务内，调用方已持有序列锁）
    fn insert_and_recompute_tx(conn: &Connection, entry: &NewLedgerEntry) -> AppResult<i64> {
        let entry_id = LedgerRepository::insert_tx(conn, entry)?;
        Self::recompute_from_tx(conn, entry.series_key(), entry.entry_date, entry_id)?;
        Ok(entry_id)
    }

    // ==========================================
    // 过账 / 修改 / 删除
    // ==========================================

    /// 过账一条分录
    ///
    /// # 返回
    /// - 写入后的分录（含重算后的余额）
    #[instrument(skip(self, entry), fields(party_id = entry.party_id, bucket = %entry.bucket))]
    pub fn post(&self, entry: NewLedgerEntry) -> AppResult<LedgerEntry> {
        entry.validate().map_err(AppError::Validation)?;

        let handles = self.lock_handles(&[entry.series_key()])?;
        let _guards = Self::acquire(&handles)?;

        let conn = self.ledger_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let entry_id = Self::insert_and_recompute_tx(&tx, &entry)?;
        recalc::after_ledger_change_tx(&tx, [entry.source])?;
        let saved = LedgerRepository::find_by_id_tx(&tx, entry_id)?;
        tx.commit()?;

        info!(entry_id = entry_id, debit = %saved.debit, credit = %saved.credit, balance = %saved.balance, "台账分录已过账");
        Ok(saved)
    }

    /// 从指定分录位置起重算（修复/校验后使用）
    pub fn recompute_after(&self, entry_id: i64) -> AppResult<usize> {
        let entry = self.ledger_repo.find_by_id(entry_id)?;
        let handles = self.lock_handles(&[entry.series_key()])?;
        let _guards = Self::acquire(&handles)?;

        let conn = self.ledger_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        // 加锁后重新读取位置
        let entry = LedgerRepository::find_by_id_tx(&tx, entry_id)?;
        let updated = Self::recompute_from_tx(&tx, entry.series_key(), entry.entry_date, entry.entry_id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// 修改分录（party/bucket 不可变）
    ///
    /// 重算起点取新旧位置中较早者
    pub fn edit(&self, entry_id: i64, patch: &LedgerEntryPatch) -> AppResult<LedgerEntry> {
        let original = self.ledger_repo.find_by_id(entry_id)?;
        let handles = self.lock_handles(&[original.series_key()])?;
        let _guards = Self::acquire(&handles)?;

        let conn = self.ledger_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let old = LedgerRepository::find_by_id_tx(&tx, entry_id)?;

        let debit = patch.debit.unwrap_or(old.debit);
        let credit = patch.credit.unwrap_or(old.credit);
        let entry_date = patch.entry_date.unwrap_or(old.entry_date);
        let description = patch.description.clone().unwrap_or_else(|| old.description.clone());

        check_amounts(debit, credit).map_err(AppError::Validation)?;
        if description.trim().is_empty() {
            return Err(AppError::validation("分录摘要不能为空"));
        }
        if old.transfer_id.is_some() && (debit != old.debit || credit != old.credit) {
            return Err(AppError::precondition(format!(
                "分录 {} 属于交叉抵扣配对，不能单边修改金额",
                entry_id
            )));
        }

        LedgerRepository::update_fields_tx(&tx, entry_id, entry_date, &description, debit, credit)?;
        Self::recompute_from_tx(&tx, old.series_key(), entry_date.min(old.entry_date), entry_id)?;
        recalc::after_ledger_change_tx(&tx, [old.source])?;
        let saved = LedgerRepository::find_by_id_tx(&tx, entry_id)?;
        tx.commit()?;

        info!(entry_id = entry_id, balance = %saved.balance, "台账分录已修改");
        Ok(saved)
    }

    /// 删除分录；交叉抵扣配对分录成对删除
    ///
    /// # 返回
    /// - 被删除的分录 ID
    pub fn delete(&self, entry_id: i64) -> AppResult<Vec<i64>> {
        let target = self.ledger_repo.find_by_id(entry_id)?;
        let affected = match target.transfer_id.clone() {
            Some(transfer_id) => self.ledger_repo.list_by_transfer(&transfer_id)?,
            None => vec![target],
        };
        let keys: Vec<SeriesKey> = affected.iter().map(LedgerEntry::series_key).collect();
        let handles = self.lock_handles(&keys)?;
        let _guards = Self::acquire(&handles)?;

        let conn = self.ledger_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut removed = Vec::with_capacity(affected.len());
        for entry in &affected {
            // 加锁后重新读取旧位置
            let old = LedgerRepository::find_by_id_tx(&tx, entry.entry_id)?;
            LedgerRepository::delete_tx(&tx, old.entry_id)?;
            Self::recompute_from_tx(&tx, old.series_key(), old.entry_date, old.entry_id)?;
            removed.push(old.entry_id);
        }
        recalc::after_ledger_change_tx(&tx, affected.iter().map(|e| e.source))?;
        tx.commit()?;

        info!(removed = ?removed, "台账分录已删除");
        Ok(removed)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 截至某日（含）的余额；as_of 为 None 时取当前余额
    pub fn balance_of(&self, party_id: i64, bucket: Bucket, as_of: Option<NaiveDate>) -> AppResult<Decimal> {
        Ok(self.ledger_repo.balance_as_of(SeriesKey::new(party_id, bucket), as_of)?)
    }

    /// 区间对账单: 期初余额 + 区间分录 + 期末余额
    pub fn statement_of(&self, party_id: i64, bucket: Bucket, from: NaiveDate, to: NaiveDate) -> AppResult<LedgerStatement> {
        if to < from {
            return Err(AppError::validation(format!("区间结束日 {} 早于开始日 {}", to, from)));
        }
        let key = SeriesKey::new(party_id, bucket);
        let opening_balance = match from.pred_opt() {
            Some(day_before) => self.ledger_repo.balance_as_of(key, Some(day_before))?,
            None => Decimal::ZERO,
        };
        let entries = self.ledger_repo.list_range(key, from, to)?;
        let closing_balance = opening_balance + entries.iter().map(|e| e.debit - e.credit).sum::<Decimal>();
        Ok(LedgerStatement {
            party_id,
            bucket,
            from,
            to,
            opening_balance,
            entries,
            closing_balance,
        })
    }

    /// 校验序列缓存余额与重新推导结果一致
    pub fn verify_series(&self, party_id: i64, bucket: Bucket) -> AppResult<usize> {
        let entries = self.ledger_repo.list_series(SeriesKey::new(party_id, bucket))?;
        let mut running = Decimal::ZERO;
        for entry in &entries {
            running += entry.debit - entry.credit;
            if entry.balance != running {
                return Err(AppError::Consistency(format!(
                    "台账余额不一致: party={}, bucket={}, entry={}, 缓存={}, 推导={}",
                    party_id, bucket, entry.entry_id, entry.balance, running
                )));
            }
        }
        Ok(entries.len())
    }

    // ==========================================
    // 业务过账
    // ==========================================

    /// 使用明细产生的收益: 贷记合约默认桶（可覆盖）
    pub fn credit_from_usage(
        &self,
        usage_id: i64,
        deal_id: i64,
        amount: Decimal,
        bucket: Option<Bucket>,
    ) -> AppResult<LedgerEntry> {
        let (usage, deal) = {
            let conn = self.ledger_repo.get_conn()?;
            (
                UsageRepository::find_by_id_tx(&conn, usage_id)?,
                DealRepository::find_by_id_tx(&conn, deal_id)?,
            )
        };
        if !usage.active {
            return Err(AppError::precondition(format!("使用明细 {} 已停用", usage_id)));
        }
        let entry = NewLedgerEntry::credit(
            deal.party_id,
            bucket.unwrap_or(deal.default_bucket),
            usage.period_end,
            amount,
            format!("版税收入: {} - {}", usage.track_name, usage.artist_name),
        )
        .with_deal(deal.deal_id)
        .with_source(LedgerSource::UsageLine(usage_id));
        self.post(entry)
    }

    /// 按合约费率计算并贷记（累计数量决定阶梯）
    pub fn credit_royalty(&self, usage_id: i64, deal_id: i64, units_to_date: i64) -> AppResult<LedgerEntry> {
        let (usage, deal) = {
            let conn = self.ledger_repo.get_conn()?;
            (
                UsageRepository::find_by_id_tx(&conn, usage_id)?,
                DealRepository::find_by_id_tx(&conn, deal_id)?,
            )
        };
        let amount = deal.royalty_for(&usage, units_to_date);
        self.credit_from_usage(usage_id, deal_id, amount, None)
    }

    /// 预付款过账（借方），完成后通知会计系统
    pub fn post_advance(&self, posting: &AdvancePosting) -> AppResult<LedgerEntry> {
        let deal = {
            let conn = self.ledger_repo.get_conn()?;
            DealRepository::find_by_id_tx(&conn, posting.deal_id)?
        };
        let bucket = posting.bucket.unwrap_or(deal.default_bucket);
        let description = posting
            .description
            .clone()
            .unwrap_or_else(|| format!("预付款 #{} ({})", posting.advance_id, deal.name));
        let entry = NewLedgerEntry::debit(deal.party_id, bucket, posting.paid_date, posting.amount, description)
            .with_deal(deal.deal_id)
            .with_source(LedgerSource::Advance(posting.advance_id));
        let saved = self.post(entry)?;

        self.poster.notify(AccountingEvent::AdvancePaid {
            advance_id: posting.advance_id,
            deal_id: deal.deal_id,
            party_id: deal.party_id,
            bucket,
            amount: posting.amount,
            paid_date: posting.paid_date,
            entry_id: saved.entry_id,
        });
        Ok(saved)
    }

    /// 交叉抵扣: 正余额桶与负余额桶之间贪心配对转账
    ///
    /// - 仅考虑生效且允许交叉抵扣的合约；没有则不做任何事
    /// - 桶按固定顺序遍历；每对转移 min(正余额, |负余额|)
    /// - 正余额桶记贷方、负余额桶记借方，双方都趋向零，总和不变
    #[instrument(skip(self))]
    pub fn cross_collateralize(&self, party_id: i64, as_of: NaiveDate) -> AppResult<Vec<CrossTransfer>> {
        let deal = {
            let conn = self.ledger_repo.get_conn()?;
            eligible_deal(&DealRepository::list_by_party_tx(&conn, party_id)?)
        };
        let deal = match deal {
            Some(d) => d,
            None => {
                debug!(party_id = party_id, "无可交叉抵扣合约，跳过");
                return Ok(Vec::new());
            }
        };

        let keys: Vec<SeriesKey> = Bucket::ALL.iter().map(|b| SeriesKey::new(party_id, *b)).collect();
        let handles = self.lock_handles(&keys)?;
        let _guards = Self::acquire(&handles)?;

        let conn = self.ledger_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut balances: Vec<(Bucket, Decimal)> = Vec::with_capacity(keys.len());
        for key in &keys {
            balances.push((key.bucket, LedgerRepository::balance_as_of_tx(&tx, *key, None)?));
        }

        let mut transfers = Vec::new();
        for (from, to, amount) in plan_transfers(&mut balances) {
            let transfer_id = Uuid::new_v4().to_string();
            let mut credit = NewLedgerEntry::credit(
                party_id,
                from,
                as_of,
                amount,
                format!("交叉抵扣: 转出至 {}", to),
            )
            .with_deal(deal.deal_id);
            credit.transfer_id = Some(transfer_id.clone());
            let mut debit = NewLedgerEntry::debit(
                party_id,
                to,
                as_of,
                amount,
                format!("交叉抵扣: 由 {} 转入", from),
            )
            .with_deal(deal.deal_id);
            debit.transfer_id = Some(transfer_id.clone());

            let credit_entry_id = Self::insert_and_recompute_tx(&tx, &credit)?;
            let debit_entry_id = Self::insert_and_recompute_tx(&tx, &debit)?;
            transfers.push(CrossTransfer {
                transfer_id,
                from_bucket: from,
                to_bucket: to,
                amount,
                credit_entry_id,
                debit_entry_id,
            });
        }
        tx.commit()?;

        info!(party_id = party_id, transfers = transfers.len(), "交叉抵扣完成");
        Ok(transfers)
    }

    /// 结算单层面的回收: 以结算单净额抵扣桶内未回收余额
    ///
    /// 金额 = min(净额 - 已回收, 桶内正余额)；为零时不过账
    pub fn recoup_statement(&self, statement_id: i64, bucket: Bucket) -> AppResult<Option<LedgerEntry>> {
        let statement = {
            let conn = self.ledger_repo.get_conn()?;
            StatementRepository::find_by_id_tx(&conn, statement_id)?
        };
        if !matches!(statement.state, StatementState::Draft | StatementState::Processing) {
            return Err(AppError::precondition(format!(
                "结算单 {} 状态为 {}，不能回收",
                statement.reference, statement.state
            )));
        }

        let key = SeriesKey::new(statement.partner_id, bucket);
        let handles = self.lock_handles(&[key])?;
        let _guards = Self::acquire(&handles)?;

        let conn = self.ledger_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let totals = StatementAggregator::recompute_tx(&tx, statement_id)?.totals;
        let outstanding = LedgerRepository::balance_as_of_tx(&tx, key, None)?;
        let amount = (totals.net_total - totals.recouped_amount).min(outstanding);
        if amount <= Decimal::ZERO {
            return Ok(None);
        }

        let entry = NewLedgerEntry::credit(
            statement.partner_id,
            bucket,
            statement.statement_date,
            amount,
            format!("结算单回收: {}", statement.reference),
        )
        .with_source(LedgerSource::Statement(statement_id));
        let entry_id = Self::insert_and_recompute_tx(&tx, &entry)?;
        recalc::after_ledger_change_tx(&tx, [entry.source])?;
        let saved = LedgerRepository::find_by_id_tx(&tx, entry_id)?;
        tx.commit()?;

        info!(statement_id = statement_id, amount = %amount, "结算单回收已过账");
        Ok(Some(saved))
    }
}

/// 交叉抵扣使用的合约: 生效且允许交叉抵扣者中 ID 最小的
fn eligible_deal(deals: &[Deal]) -> Option<Deal> {
    deals
        .iter()
        .filter(|d| d.cross_collateralize && d.status.is_in_force())
        .min_by_key(|d| d.deal_id)
        .cloned()
}

/// 贪心配对: 返回 (正余额桶, 负余额桶, 金额)，并就地更新余额
fn plan_transfers(balances: &mut [(Bucket, Decimal)]) -> Vec<(Bucket, Bucket, Decimal)> {
    let mut plan = Vec::new();
    for i in 0..balances.len() {
        for j in 0..balances.len() {
            let (positive, negative) = (balances[i].1, balances[j].1);
            if positive <= Decimal::ZERO {
                break;
            }
            if negative >= Decimal::ZERO {
                continue;
            }
            let amount = positive.min(-negative);
            balances[i].1 -= amount;
            balances[j].1 += amount;
            plan.push((balances[i].0, balances[j].0, amount));
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_plan_transfers_conserves_sum() {
        let mut balances = vec![
            (Bucket::Recording, dec!(300.10)),
            (Bucket::Video, dec!(-100.05)),
            (Bucket::TourSupport, dec!(50)),
            (Bucket::Marketing, dec!(-400)),
            (Bucket::Other, Decimal::ZERO),
        ];
        let before: Decimal = balances.iter().map(|b| b.1).sum();
        let magnitudes: Vec<Decimal> = balances.iter().map(|b| b.1.abs()).collect();

        let plan = plan_transfers(&mut balances);
        let after: Decimal = balances.iter().map(|b| b.1).sum();
        assert_eq!(before, after);
        for (b, m) in balances.iter().zip(magnitudes) {
            assert!(b.1.abs() <= m);
        }
        assert_eq!(
            plan,
            vec![
                (Bucket::Recording, Bucket::Video, dec!(100.05)),
                (Bucket::Recording, Bucket::Marketing, dec!(200.05)),
                (Bucket::TourSupport, Bucket::Marketing, dec!(50)),
            ]
        );
        assert_eq!(balances[0].1, Decimal::ZERO);
        assert_eq!(balances[3].1, dec!(-149.95));
    }

    #[test]
    fn test_plan_transfers_noop_without_opposite_signs() {
        let mut balances = vec![(Bucket::Recording, dec!(10)), (Bucket::Video, dec!(5))];
        assert!(plan_transfers(&mut balances).is_empty());
    }
}
