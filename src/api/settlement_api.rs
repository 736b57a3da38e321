// ==========================================
// 版权结算对账系统 - 结算单与付款 API
// ==========================================
// 职责: 结算单生命周期、付款分配与状态切换
// 报表协作方只读: get_statement / list_statements
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::validator::{parse_date, parse_payment_method};
use crate::domain::payment::Payment;
use crate::domain::statement::{NewStatement, Statement};
use crate::domain::types::StatementState;
use crate::engine::{PaymentReconciliation, StatementAggregator};
use crate::repository::StatementRepository;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 新建结算单（字符串形式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStatementInput {
    pub partner_id: i64,
    pub period_start: String,
    pub period_end: String,
    pub currency: String,
    pub statement_date: String,
}

pub struct SettlementApi {
    statements: Arc<StatementAggregator>,
    payments: Arc<PaymentReconciliation>,
    statement_repo: Arc<StatementRepository>,
}

impl SettlementApi {
    pub fn new(
        statements: Arc<StatementAggregator>,
        payments: Arc<PaymentReconciliation>,
        statement_repo: Arc<StatementRepository>,
    ) -> Self {
        Self {
            statements,
            payments,
            statement_repo,
        }
    }

    // ==========================================
    // 结算单
    // ==========================================

    pub fn create_statement(&self, input: &NewStatementInput) -> ApiResult<Statement> {
        let req = NewStatement {
            partner_id: input.partner_id,
            period_start: parse_date("period_start", &input.period_start)?,
            period_end: parse_date("period_end", &input.period_end)?,
            currency: input.currency.trim().to_uppercase(),
            statement_date: parse_date("statement_date", &input.statement_date)?,
        };
        Ok(self.statements.create(&req)?)
    }

    pub fn get_statement(&self, statement_id: i64) -> ApiResult<Statement> {
        Ok(self.statements.get(statement_id)?)
    }

    pub fn list_statements(&self, partner_id: Option<i64>, state: Option<&str>) -> ApiResult<Vec<Statement>> {
        let state = state
            .map(|raw| {
                StatementState::parse(raw).ok_or_else(|| ApiError::InvalidInput(format!("state 取值无效: {}", raw)))
            })
            .transpose()?;
        let list = match (partner_id, state) {
            (Some(partner), state) => self
                .statement_repo
                .list_by_partner(partner)?
                .into_iter()
                .filter(|s| state.map_or(true, |st| s.state == st))
                .collect(),
            (None, Some(state)) => self.statement_repo.list_by_state(state)?,
            (None, None) => {
                return Err(ApiError::InvalidInput("需要指定 partner_id 或 state".to_string()));
            }
        };
        Ok(list)
    }

    pub fn attach_usage(&self, statement_id: i64, usage_ids: &[i64]) -> ApiResult<Statement> {
        Ok(self.statements.attach_usage(statement_id, usage_ids)?)
    }

    pub fn detach_usage(&self, statement_id: i64, usage_ids: &[i64]) -> ApiResult<Statement> {
        Ok(self.statements.detach_usage(statement_id, usage_ids)?)
    }

    /// 人工调整（可为负）
    pub fn set_manual_adjustment(&self, statement_id: i64, amount: Decimal) -> ApiResult<Statement> {
        Ok(self.statements.set_manual_adjustment(statement_id, amount)?)
    }

    /// 结算单状态操作
    ///
    /// # 参数
    /// - action: process / send / approve / pay / cancel / reset
    pub fn statement_action(&self, statement_id: i64, action: &str) -> ApiResult<Statement> {
        let result = match action.trim().to_lowercase().as_str() {
            "process" => self.statements.mark_processing(statement_id),
            "send" => self.statements.mark_sent(statement_id),
            "approve" => self.statements.mark_approved(statement_id),
            "pay" => self.statements.mark_paid(statement_id),
            "cancel" => self.statements.cancel(statement_id),
            "reset" => self.statements.reset_to_draft(statement_id),
            other => return Err(ApiError::InvalidInput(format!("未知的结算单操作: {}", other))),
        };
        Ok(result?)
    }

    // ==========================================
    // 付款
    // ==========================================

    pub fn create_payment(
        &self,
        partner_id: Option<i64>,
        payment_date: &str,
        method: &str,
        memo: Option<&str>,
    ) -> ApiResult<Payment> {
        Ok(self.payments.create(
            partner_id,
            parse_date("payment_date", payment_date)?,
            parse_payment_method(method)?,
            memo,
        )?)
    }

    pub fn get_payment(&self, payment_id: i64) -> ApiResult<Payment> {
        Ok(self.payments.get(payment_id)?)
    }

    pub fn allocate(&self, payment_id: i64, statement_id: i64, amount: Decimal) -> ApiResult<Payment> {
        Ok(self.payments.allocate(payment_id, statement_id, amount)?)
    }

    pub fn update_allocation(&self, line_id: i64, amount: Decimal) -> ApiResult<Payment> {
        Ok(self.payments.update_allocation(line_id, amount)?)
    }

    pub fn remove_allocation(&self, line_id: i64) -> ApiResult<Payment> {
        Ok(self.payments.remove_allocation(line_id)?)
    }

    /// 付款状态操作
    ///
    /// # 参数
    /// - action: post / reconcile / cancel / reset
    pub fn payment_action(&self, payment_id: i64, action: &str) -> ApiResult<Payment> {
        let result = match action.trim().to_lowercase().as_str() {
            "post" => self.payments.post(payment_id),
            "reconcile" => self.payments.reconcile(payment_id),
            "cancel" => self.payments.cancel(payment_id),
            "reset" => self.payments.reset_to_draft(payment_id),
            other => return Err(ApiError::InvalidInput(format!("未知的付款操作: {}", other))),
        };
        Ok(result?)
    }
}
