// ==========================================
// 版权结算对账系统 - 回收台账 Repository
// ==========================================
// 职责: ledger_entry 表的读写（按 (party, bucket, date, id) 索引）
// 说明: 余额重算由引擎层在事务内编排，这里只提供原子读写
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::db::{open_shared_connection, SharedConnection};
use crate::domain::ledger::{LedgerEntry, LedgerSource, NewLedgerEntry, SeriesKey};
use crate::domain::types::Bucket;
use crate::repository::{decode_decimal, decode_enum, encode_decimal};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::sync::MutexGuard;

const LEDGER_COLUMNS: &str = r#"
    entry_id, party_id, deal_id, bucket, entry_date, description, debit, credit, balance,
    source_kind, source_id, transfer_id, created_at
"#;

fn map_ledger_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let kind: String = row.get(9)?;
    let source_id: Option<i64> = row.get(10)?;
    let source = LedgerSource::from_columns(&kind, source_id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(LedgerEntry {
        entry_id: row.get(0)?,
        party_id: row.get(1)?,
        deal_id: row.get(2)?,
        bucket: decode_enum(3, row.get(3)?, Bucket::parse)?,
        entry_date: row.get(4)?,
        description: row.get(5)?,
        debit: decode_decimal(row, 6)?,
        credit: decode_decimal(row, 7)?,
        balance: decode_decimal(row, 8)?,
        source,
        transfer_id: row.get(11)?,
        created_at: row.get(12)?,
    })
}

/// 借贷净额（debit - credit）逐行精确累加
fn sum_net(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> RepositoryResult<Decimal> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut total = Decimal::ZERO;
    while let Some(row) = rows.next()? {
        total += decode_decimal(row, 0)? - decode_decimal(row, 1)?;
    }
    Ok(total)
}

fn query_entries(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> RepositoryResult<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map_ledger_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ==========================================
// LedgerRepository
// ==========================================
pub struct LedgerRepository {
    conn: SharedConnection,
}

impl LedgerRepository {
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

    /// 插入分录（balance 先写 0，由调用方重算）
    pub fn insert_tx(conn: &Connection, entry: &NewLedgerEntry) -> RepositoryResult<i64> {
        let (kind, source_id) = entry.source.to_columns();
        conn.execute(
            r#"
            INSERT INTO ledger_entry (
                party_id, deal_id, bucket, entry_date, description, debit, credit, balance,
                source_kind, source_id, transfer_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '0', ?8, ?9, ?10, ?11)
            "#,
            params![
                entry.party_id,
                entry.deal_id,
                entry.bucket.as_str(),
                entry.entry_date,
                entry.description,
                encode_decimal(entry.debit),
                encode_decimal(entry.credit),
                kind,
                source_id,
                entry.transfer_id,
                Utc::now(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn find_by_id_tx(conn: &Connection, entry_id: i64) -> RepositoryResult<LedgerEntry> {
        let sql = format!("SELECT {} FROM ledger_entry WHERE entry_id = ?1", LEDGER_COLUMNS);
        conn.query_row(&sql, params![entry_id], map_ledger_row)
            .optional()?
            .ok_or_else(|| RepositoryError::not_found("LedgerEntry", entry_id))
    }

    /// 覆盖可编辑字段
    pub fn update_fields_tx(
        conn: &Connection,
        entry_id: i64,
        entry_date: NaiveDate,
        description: &str,
        debit: Decimal,
        credit: Decimal,
    ) -> RepositoryResult<()> {
        let affected = conn.execute(
            r#"
            UPDATE ledger_entry
            SET entry_date = ?2, description = ?3, debit = ?4, credit = ?5
            WHERE entry_id = ?1
            "#,
            params![entry_id, entry_date, description, encode_decimal(debit), encode_decimal(credit)],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("LedgerEntry", entry_id));
        }
        Ok(())
    }

    pub fn delete_tx(conn: &Connection, entry_id: i64) -> RepositoryResult<()> {
        conn.execute("DELETE FROM ledger_entry WHERE entry_id = ?1", params![entry_id])?;
        Ok(())
    }

    pub fn update_balance_tx(conn: &Connection, entry_id: i64, balance: Decimal) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE ledger_entry SET balance = ?2 WHERE entry_id = ?1",
            params![entry_id, encode_decimal(balance)],
        )?;
        Ok(())
    }

    /// 严格位于 (date, id) 之前的分录借贷净额
    pub fn sum_before_tx(conn: &Connection, key: SeriesKey, date: NaiveDate, entry_id: i64) -> RepositoryResult<Decimal> {
        sum_net(
            conn,
            r#"
            SELECT debit, credit FROM ledger_entry
            WHERE party_id = ?1 AND bucket = ?2
              AND (entry_date < ?3 OR (entry_date = ?3 AND entry_id < ?4))
            "#,
            params![key.party_id, key.bucket.as_str(), date, entry_id],
        )
    }

    /// 位于 (date, id) 及之后的分录，按 (date, id) 升序
    pub fn list_from_tx(conn: &Connection, key: SeriesKey, date: NaiveDate, entry_id: i64) -> RepositoryResult<Vec<LedgerEntry>> {
        let sql = format!(
            r#"
            SELECT {} FROM ledger_entry
            WHERE party_id = ?1 AND bucket = ?2
              AND (entry_date > ?3 OR (entry_date = ?3 AND entry_id >= ?4))
            ORDER BY entry_date ASC, entry_id ASC
            "#,
            LEDGER_COLUMNS
        );
        query_entries(conn, &sql, params![key.party_id, key.bucket.as_str(), date, entry_id])
    }

    /// 整条序列，按 (date, id) 升序
    pub fn list_series_tx(conn: &Connection, key: SeriesKey) -> RepositoryResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM ledger_entry WHERE party_id = ?1 AND bucket = ?2 ORDER BY entry_date ASC, entry_id ASC",
            LEDGER_COLUMNS
        );
        query_entries(conn, &sql, params![key.party_id, key.bucket.as_str()])
    }

    /// 截至某日（含）的余额；as_of 为 None 时取全部
    pub fn balance_as_of_tx(conn: &Connection, key: SeriesKey, as_of: Option<NaiveDate>) -> RepositoryResult<Decimal> {
        match as_of {
            Some(date) => sum_net(
                conn,
                r#"
                SELECT debit, credit FROM ledger_entry
                WHERE party_id = ?1 AND bucket = ?2 AND entry_date <= ?3
                "#,
                params![key.party_id, key.bucket.as_str(), date],
            ),
            None => sum_net(
                conn,
                "SELECT debit, credit FROM ledger_entry WHERE party_id = ?1 AND bucket = ?2",
                params![key.party_id, key.bucket.as_str()],
            ),
        }
    }

    /// 来源单据对应的分录
    pub fn list_by_source_tx(conn: &Connection, source: LedgerSource) -> RepositoryResult<Vec<LedgerEntry>> {
        let (kind, source_id) = source.to_columns();
        let sql = format!(
            "SELECT {} FROM ledger_entry WHERE source_kind = ?1 AND source_id IS ?2 ORDER BY entry_id",
            LEDGER_COLUMNS
        );
        query_entries(conn, &sql, params![kind, source_id])
    }

    /// 交叉抵扣配对分录
    pub fn list_by_transfer_tx(conn: &Connection, transfer_id: &str) -> RepositoryResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM ledger_entry WHERE transfer_id = ?1 ORDER BY entry_id",
            LEDGER_COLUMNS
        );
        query_entries(conn, &sql, params![transfer_id])
    }

    // ==========================================
    // 只读查询（报表协作方）
    // ==========================================

    pub fn find_by_id(&self, entry_id: i64) -> RepositoryResult<LedgerEntry> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, entry_id)
    }

    pub fn list_series(&self, key: SeriesKey) -> RepositoryResult<Vec<LedgerEntry>> {
        let conn = self.get_conn()?;
        Self::list_series_tx(&conn, key)
    }

    pub fn balance_as_of(&self, key: SeriesKey, as_of: Option<NaiveDate>) -> RepositoryResult<Decimal> {
        let conn = self.get_conn()?;
        Self::balance_as_of_tx(&conn, key, as_of)
    }

    /// 区间内分录（含端点），按 (date, id) 升序
    pub fn list_range(&self, key: SeriesKey, from: NaiveDate, to: NaiveDate) -> RepositoryResult<Vec<LedgerEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM ledger_entry
            WHERE party_id = ?1 AND bucket = ?2 AND entry_date >= ?3 AND entry_date <= ?4
            ORDER BY entry_date ASC, entry_id ASC
            "#,
            LEDGER_COLUMNS
        );
        query_entries(&conn, &sql, params![key.party_id, key.bucket.as_str(), from, to])
    }

    pub fn list_by_source(&self, source: LedgerSource) -> RepositoryResult<Vec<LedgerEntry>> {
        let conn = self.get_conn()?;
        Self::list_by_source_tx(&conn, source)
    }

    pub fn list_by_transfer(&self, transfer_id: &str) -> RepositoryResult<Vec<LedgerEntry>> {
        let conn = self.get_conn()?;
        Self::list_by_transfer_tx(&conn, transfer_id)
    }
}
