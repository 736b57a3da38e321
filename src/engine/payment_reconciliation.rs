// ==========================================
// 版权结算对账系统 - 付款对账引擎
// ==========================================
// 状态机: DRAFT → POSTED → RECONCILED，任意非取消状态可取消，
//         非草稿可显式重置为 DRAFT
// 红线: 一笔付款的所有分配指向同一收款方的结算单
//       付款状态变化后，同一事务内重算全部被分配的结算单
// ==========================================

use crate::domain::payment::{check_allocation_amount, Payment};
use crate::domain::types::{PaymentMethod, PaymentState, StatementState};
use crate::engine::events::{AccountingEvent, OptionalAccountingPoster};
use crate::engine::recalc;
use crate::error::{AppError, AppResult};
use crate::repository::{PaymentRepository, StatementRepository};
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

pub struct PaymentReconciliation {
    payment_repo: Arc<PaymentRepository>,
    poster: OptionalAccountingPoster,
}

impl PaymentReconciliation {
    pub fn new(payment_repo: Arc<PaymentRepository>, poster: OptionalAccountingPoster) -> Self {
        Self { payment_repo, poster }
    }

    pub fn get(&self, payment_id: i64) -> AppResult<Payment> {
        Ok(self.payment_repo.find_by_id(payment_id)?)
    }

    /// 新建草稿付款（收款方可在首次分配时推导）
    pub fn create(
        &self,
        partner_id: Option<i64>,
        payment_date: NaiveDate,
        method: PaymentMethod,
        memo: Option<&str>,
    ) -> AppResult<Payment> {
        let conn = self.payment_repo.get_conn()?;
        let payment_id = PaymentRepository::insert_tx(&conn, partner_id, payment_date, method, memo)?;
        Ok(PaymentRepository::find_by_id_tx(&conn, payment_id)?)
    }

    fn require_draft(payment: &Payment, action: &str) -> AppResult<()> {
        if payment.state != PaymentState::Draft {
            return Err(AppError::precondition(format!(
                "付款 {} 状态为 {}，不能{}",
                payment.payment_id, payment.state, action
            )));
        }
        Ok(())
    }

    // ==========================================
    // 分配
    // ==========================================

    /// 分配金额到结算单
    ///
    /// 校验顺序: 金额 > 0 → 付款为草稿 → 结算单未取消 → 收款方一致
    pub fn allocate(&self, payment_id: i64, statement_id: i64, amount: Decimal) -> AppResult<Payment> {
        check_allocation_amount(amount).map_err(AppError::Validation)?;

        let conn = self.payment_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let payment = PaymentRepository::find_by_id_tx(&tx, payment_id)?;
        Self::require_draft(&payment, "分配")?;

        let statement = StatementRepository::find_by_id_tx(&tx, statement_id)?;
        if statement.state == StatementState::Cancelled {
            return Err(AppError::precondition(format!("结算单 {} 已取消", statement.reference)));
        }
        match payment.partner_id {
            Some(partner) if partner != statement.partner_id => {
                return Err(AppError::validation(format!(
                    "结算单 {} 的收款方 {} 与付款收款方 {} 不一致",
                    statement.reference, statement.partner_id, partner
                )));
            }
            Some(_) => {}
            None => PaymentRepository::set_partner_tx(&tx, payment_id, statement.partner_id)?,
        }

        PaymentRepository::insert_line_tx(&tx, payment_id, statement_id, amount)?;
        recalc::after_payment_change_tx(&tx, [statement_id])?;
        let payment = PaymentRepository::find_by_id_tx(&tx, payment_id)?;
        tx.commit()?;

        info!(payment_id = payment_id, statement_id = statement_id, amount = %amount, "付款已分配");
        Ok(payment)
    }

    /// 修改分配金额（仅草稿）
    pub fn update_allocation(&self, line_id: i64, amount: Decimal) -> AppResult<Payment> {
        check_allocation_amount(amount).map_err(AppError::Validation)?;

        let conn = self.payment_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let line = PaymentRepository::find_line_tx(&tx, line_id)?;
        let payment = PaymentRepository::find_by_id_tx(&tx, line.payment_id)?;
        Self::require_draft(&payment, "修改分配")?;

        PaymentRepository::update_line_amount_tx(&tx, line_id, amount)?;
        recalc::after_payment_change_tx(&tx, [line.statement_id])?;
        let payment = PaymentRepository::find_by_id_tx(&tx, line.payment_id)?;
        tx.commit()?;
        Ok(payment)
    }

    /// 删除分配（仅草稿）
    pub fn remove_allocation(&self, line_id: i64) -> AppResult<Payment> {
        let conn = self.payment_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let line = PaymentRepository::find_line_tx(&tx, line_id)?;
        let payment = PaymentRepository::find_by_id_tx(&tx, line.payment_id)?;
        Self::require_draft(&payment, "删除分配")?;

        PaymentRepository::delete_line_tx(&tx, line_id)?;
        recalc::after_payment_change_tx(&tx, [line.statement_id])?;
        let payment = PaymentRepository::find_by_id_tx(&tx, line.payment_id)?;
        tx.commit()?;
        Ok(payment)
    }

    // ==========================================
    // 状态切换
    // ==========================================

    fn transition_tx(
        conn: &Connection,
        payment_id: i64,
        action: &str,
        allowed: fn(PaymentState) -> bool,
        target: PaymentState,
    ) -> AppResult<Payment> {
        let payment = PaymentRepository::find_by_id_tx(conn, payment_id)?;
        if !allowed(payment.state) {
            return Err(AppError::precondition(format!(
                "付款 {} 状态为 {}，不能{}",
                payment_id, payment.state, action
            )));
        }
        PaymentRepository::update_state_tx(conn, payment_id, target)?;
        recalc::after_payment_change_tx(conn, payment.statement_ids())?;
        info!(payment_id = payment_id, from = %payment.state, to = %target, "付款{}", action);
        Ok(PaymentRepository::find_by_id_tx(conn, payment_id)?)
    }

    fn transition(
        &self,
        payment_id: i64,
        action: &str,
        allowed: fn(PaymentState) -> bool,
        target: PaymentState,
    ) -> AppResult<Payment> {
        let conn = self.payment_repo.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let payment = Self::transition_tx(&tx, payment_id, action, allowed, target)?;
        tx.commit()?;
        Ok(payment)
    }

    /// 过账（至少一条分配），提交后通知会计系统
    pub fn post(&self, payment_id: i64) -> AppResult<Payment> {
        let payment = {
            let conn = self.payment_repo.get_conn()?;
            let tx = conn.unchecked_transaction()?;
            let current = PaymentRepository::find_by_id_tx(&tx, payment_id)?;
            if current.lines.is_empty() {
                return Err(AppError::validation(format!("付款 {} 没有分配，不能过账", payment_id)));
            }
            let payment = Self::transition_tx(&tx, payment_id, "过账", |s| s == PaymentState::Draft, PaymentState::Posted)?;
            tx.commit()?;
            payment
        };

        self.poster.notify(AccountingEvent::PaymentPosted {
            payment_id,
            partner_id: payment.partner_id,
            payment_date: payment.payment_date,
            amount: payment.amount_total(),
            statement_ids: payment.statement_ids(),
        });
        Ok(payment)
    }

    pub fn reconcile(&self, payment_id: i64) -> AppResult<Payment> {
        self.transition(payment_id, "对账", |s| s == PaymentState::Posted, PaymentState::Reconciled)
    }

    pub fn cancel(&self, payment_id: i64) -> AppResult<Payment> {
        self.transition(payment_id, "取消", |s| s != PaymentState::Cancelled, PaymentState::Cancelled)
    }

    pub fn reset_to_draft(&self, payment_id: i64) -> AppResult<Payment> {
        self.transition(payment_id, "重置为草稿", |s| s != PaymentState::Draft, PaymentState::Draft)
    }
}
