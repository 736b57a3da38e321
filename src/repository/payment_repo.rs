// ==========================================
// 版权结算对账系统 - 付款 Repository
// ==========================================
// 职责: payment / payment_line 表读写
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::db::{open_shared_connection, SharedConnection};
use crate::domain::payment::{Payment, PaymentLine};
use crate::domain::types::{PaymentMethod, PaymentState};
use crate::repository::{decode_decimal, decode_enum, encode_decimal};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::sync::MutexGuard;

// ==========================================
// PaymentRepository
// ==========================================
pub struct PaymentRepository {
    conn: SharedConnection,
}

impl PaymentRepository {
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

    pub fn insert_tx(
        conn: &Connection,
        partner_id: Option<i64>,
        payment_date: NaiveDate,
        method: PaymentMethod,
        memo: Option<&str>,
    ) -> RepositoryResult<i64> {
        let now = Utc::now();
        conn.execute(
            r#"
            INSERT INTO payment (partner_id, payment_date, method, state, memo, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'DRAFT', ?4, ?5, ?5)
            "#,
            params![partner_id, payment_date, method.as_str(), memo, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 读取付款（含分配行）
    pub fn find_by_id_tx(conn: &Connection, payment_id: i64) -> RepositoryResult<Payment> {
        let header = conn
            .query_row(
                r#"
                SELECT payment_id, partner_id, payment_date, method, state, memo, created_at, updated_at
                FROM payment WHERE payment_id = ?1
                "#,
                params![payment_id],
                |row| {
                    Ok(Payment {
                        payment_id: row.get(0)?,
                        partner_id: row.get(1)?,
                        payment_date: row.get(2)?,
                        method: decode_enum(3, row.get(3)?, PaymentMethod::parse)?,
                        state: decode_enum(4, row.get(4)?, PaymentState::parse)?,
                        memo: row.get(5)?,
                        lines: Vec::new(),
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()?;

        let mut payment = header.ok_or_else(|| RepositoryError::not_found("Payment", payment_id))?;
        payment.lines = Self::list_lines_tx(conn, payment_id)?;
        Ok(payment)
    }

    pub fn list_lines_tx(conn: &Connection, payment_id: i64) -> RepositoryResult<Vec<PaymentLine>> {
        let mut stmt = conn.prepare(
            "SELECT line_id, payment_id, statement_id, amount FROM payment_line WHERE payment_id = ?1 ORDER BY line_id",
        )?;
        let rows = stmt.query_map(params![payment_id], |row| {
            Ok(PaymentLine {
                line_id: row.get(0)?,
                payment_id: row.get(1)?,
                statement_id: row.get(2)?,
                amount: decode_decimal(row, 3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn find_line_tx(conn: &Connection, line_id: i64) -> RepositoryResult<PaymentLine> {
        conn.query_row(
            "SELECT line_id, payment_id, statement_id, amount FROM payment_line WHERE line_id = ?1",
            params![line_id],
            |row| {
                Ok(PaymentLine {
                    line_id: row.get(0)?,
                    payment_id: row.get(1)?,
                    statement_id: row.get(2)?,
                    amount: decode_decimal(row, 3)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| RepositoryError::not_found("PaymentLine", line_id))
    }

    pub fn update_state_tx(conn: &Connection, payment_id: i64, state: PaymentState) -> RepositoryResult<()> {
        let affected = conn.execute(
            "UPDATE payment SET state = ?2, updated_at = ?3 WHERE payment_id = ?1",
            params![payment_id, state.as_str(), Utc::now()],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("Payment", payment_id));
        }
        Ok(())
    }

    pub fn set_partner_tx(conn: &Connection, payment_id: i64, partner_id: i64) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE payment SET partner_id = ?2, updated_at = ?3 WHERE payment_id = ?1",
            params![payment_id, partner_id, Utc::now()],
        )?;
        Ok(())
    }

    pub fn insert_line_tx(conn: &Connection, payment_id: i64, statement_id: i64, amount: Decimal) -> RepositoryResult<i64> {
        conn.execute(
            "INSERT INTO payment_line (payment_id, statement_id, amount) VALUES (?1, ?2, ?3)",
            params![payment_id, statement_id, encode_decimal(amount)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_line_amount_tx(conn: &Connection, line_id: i64, amount: Decimal) -> RepositoryResult<()> {
        let affected = conn.execute(
            "UPDATE payment_line SET amount = ?2 WHERE line_id = ?1",
            params![line_id, encode_decimal(amount)],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("PaymentLine", line_id));
        }
        Ok(())
    }

    pub fn delete_line_tx(conn: &Connection, line_id: i64) -> RepositoryResult<()> {
        conn.execute("DELETE FROM payment_line WHERE line_id = ?1", params![line_id])?;
        Ok(())
    }

    // ==========================================
    // 只读查询
    // ==========================================

    pub fn find_by_id(&self, payment_id: i64) -> RepositoryResult<Payment> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, payment_id)
    }

    /// 收款方的付款 ID（按日期倒序）
    pub fn list_ids_by_partner(&self, partner_id: i64) -> RepositoryResult<Vec<i64>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT payment_id FROM payment WHERE partner_id = ?1 ORDER BY payment_date DESC, payment_id DESC",
        )?;
        let rows = stmt.query_map(params![partner_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<i64>, _>>()?)
    }
}
