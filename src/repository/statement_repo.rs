// ==========================================
// 版权结算对账系统 - 结算单 Repository
// ==========================================
// 职责: statement 表读写 + 合计计算所需的输入查询
// 红线: Repository 不计算合计，只存取结果
// ==========================================

use crate::db::{open_shared_connection, SharedConnection};
use crate::domain::statement::{statement_reference, NewStatement, Statement, StatementTotals};
use crate::domain::types::{PaymentState, StatementState};
use crate::repository::{decode_decimal, decode_enum, encode_decimal};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{Duration, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::sync::MutexGuard;

/// 结算单付款期限（天）
pub const STATEMENT_DUE_DAYS: i64 = 30;

const STATEMENT_COLUMNS: &str = r#"
    statement_id, reference, partner_id, period_start, period_end, currency, state,
    statement_date, due_date, sent_date, approved_date, paid_date,
    manual_adjustment, gross_total, fee_total, net_total, recouped_amount, payable,
    paid_amount, balance_due, usage_line_count, created_at, updated_at
"#;

fn map_statement_row(row: &Row<'_>) -> rusqlite::Result<Statement> {
    Ok(Statement {
        statement_id: row.get(0)?,
        reference: row.get(1)?,
        partner_id: row.get(2)?,
        period_start: row.get(3)?,
        period_end: row.get(4)?,
        currency: row.get(5)?,
        state: decode_enum(6, row.get(6)?, StatementState::parse)?,
        statement_date: row.get(7)?,
        due_date: row.get(8)?,
        sent_date: row.get(9)?,
        approved_date: row.get(10)?,
        paid_date: row.get(11)?,
        totals: StatementTotals {
            manual_adjustment: decode_decimal(row, 12)?,
            gross_total: decode_decimal(row, 13)?,
            fee_total: decode_decimal(row, 14)?,
            net_total: decode_decimal(row, 15)?,
            recouped_amount: decode_decimal(row, 16)?,
            payable: decode_decimal(row, 17)?,
            paid_amount: decode_decimal(row, 18)?,
            balance_due: decode_decimal(row, 19)?,
        },
        usage_line_count: row.get(20)?,
        created_at: row.get(21)?,
        updated_at: row.get(22)?,
    })
}

/// 结算单状态相关日期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatementDates {
    pub sent_date: Option<NaiveDate>,
    pub approved_date: Option<NaiveDate>,
    pub paid_date: Option<NaiveDate>,
}

/// 付款分配（合计计算输入）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationInput {
    pub amount: Decimal,
    pub payment_state: PaymentState,
}

// ==========================================
// StatementRepository
// ==========================================
pub struct StatementRepository {
    conn: SharedConnection,
}

impl StatementRepository {
    /// 创建新的 Repository 实例（打开连接并建表）
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_shared_connection(db_path)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: SharedConnection) -> Self {
        Self { conn }
    }

    pub fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    /// 新建草稿结算单（编号在取得 ID 后回填）
    pub fn insert_tx(conn: &Connection, req: &NewStatement) -> RepositoryResult<i64> {
        let now = Utc::now();
        let due_date = req.statement_date + Duration::days(STATEMENT_DUE_DAYS);
        conn.execute(
            r#"
            INSERT INTO statement (
                partner_id, period_start, period_end, currency, state,
                statement_date, due_date, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 'DRAFT', ?5, ?6, ?7, ?7)
            "#,
            params![
                req.partner_id,
                req.period_start,
                req.period_end,
                req.currency.trim().to_uppercase(),
                req.statement_date,
                due_date,
                now,
            ],
        )?;
        let statement_id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE statement SET reference = ?2 WHERE statement_id = ?1",
            params![statement_id, statement_reference(req.statement_date, statement_id)],
        )?;
        Ok(statement_id)
    }

    pub fn find_by_id_tx(conn: &Connection, statement_id: i64) -> RepositoryResult<Statement> {
        let sql = format!("SELECT {} FROM statement WHERE statement_id = ?1", STATEMENT_COLUMNS);
        conn.query_row(&sql, params![statement_id], map_statement_row)
            .optional()?
            .ok_or_else(|| RepositoryError::not_found("Statement", statement_id))
    }

    /// 写入合计
    pub fn update_totals_tx(
        conn: &Connection,
        statement_id: i64,
        totals: &StatementTotals,
        usage_line_count: i64,
    ) -> RepositoryResult<()> {
        let affected = conn.execute(
            r#"
            UPDATE statement SET
                manual_adjustment = ?2, gross_total = ?3, fee_total = ?4, net_total = ?5,
                recouped_amount = ?6, payable = ?7, paid_amount = ?8, balance_due = ?9,
                usage_line_count = ?10, updated_at = ?11
            WHERE statement_id = ?1
            "#,
            params![
                statement_id,
                encode_decimal(totals.manual_adjustment),
                encode_decimal(totals.gross_total),
                encode_decimal(totals.fee_total),
                encode_decimal(totals.net_total),
                encode_decimal(totals.recouped_amount),
                encode_decimal(totals.payable),
                encode_decimal(totals.paid_amount),
                encode_decimal(totals.balance_due),
                usage_line_count,
                Utc::now(),
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("Statement", statement_id));
        }
        Ok(())
    }

    /// 写入状态及状态日期
    pub fn update_state_tx(
        conn: &Connection,
        statement_id: i64,
        state: StatementState,
        dates: StatementDates,
    ) -> RepositoryResult<()> {
        let affected = conn.execute(
            r#"
            UPDATE statement SET state = ?2, sent_date = ?3, approved_date = ?4, paid_date = ?5, updated_at = ?6
            WHERE statement_id = ?1
            "#,
            params![
                statement_id,
                state.as_str(),
                dates.sent_date,
                dates.approved_date,
                dates.paid_date,
                Utc::now(),
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("Statement", statement_id));
        }
        Ok(())
    }

    pub fn set_manual_adjustment_tx(conn: &Connection, statement_id: i64, amount: Decimal) -> RepositoryResult<()> {
        let affected = conn.execute(
            "UPDATE statement SET manual_adjustment = ?2, updated_at = ?3 WHERE statement_id = ?1",
            params![statement_id, encode_decimal(amount), Utc::now()],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("Statement", statement_id));
        }
        Ok(())
    }

    /// 结算单上的付款分配（含付款状态）
    pub fn list_allocations_tx(conn: &Connection, statement_id: i64) -> RepositoryResult<Vec<AllocationInput>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT pl.amount, p.state
            FROM payment_line pl
            JOIN payment p ON p.payment_id = pl.payment_id
            WHERE pl.statement_id = ?1
            ORDER BY pl.line_id
            "#,
        )?;
        let rows = stmt.query_map(params![statement_id], |row| {
            Ok(AllocationInput {
                amount: decode_decimal(row, 0)?,
                payment_state: decode_enum(1, row.get(1)?, PaymentState::parse)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ==========================================
    // 只读查询
    // ==========================================

    pub fn find_by_id(&self, statement_id: i64) -> RepositoryResult<Statement> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, statement_id)
    }

    /// 收款方的结算单（按期间倒序）
    pub fn list_by_partner(&self, partner_id: i64) -> RepositoryResult<Vec<Statement>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM statement WHERE partner_id = ?1 ORDER BY period_start DESC, statement_id DESC",
            STATEMENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![partner_id], map_statement_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// 指定状态的结算单
    pub fn list_by_state(&self, state: StatementState) -> RepositoryResult<Vec<Statement>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM statement WHERE state = ?1 ORDER BY statement_id",
            STATEMENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![state.as_str()], map_statement_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
