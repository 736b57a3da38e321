// ==========================================
// 版权结算对账系统 - 使用明细 Repository
// ==========================================
// 职责: usage_record 表的读写
// 说明: `*_tx` 关联函数接收 &Connection，供引擎在同一事务内组合调用
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::db::{open_shared_connection, SharedConnection};
use crate::domain::types::{MatchState, SourceType, UsageType};
use crate::domain::usage::{UsageDuplicateKey, UsageRecord};
use crate::repository::{decode_decimal, decode_enum, encode_decimal};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::sync::MutexGuard;

const USAGE_COLUMNS: &str = r#"
    usage_id, source_type, source_reference, import_batch_id, period_start, period_end,
    territory_code, service_name, track_name, artist_name, album_name, isrc, iswc, upc,
    usage_type, units, gross_amount, fees, currency, exchange_rate, match_state, confidence,
    recording_id, work_id, statement_id, processed, active, created_at, updated_at
"#;

fn map_usage_row(row: &Row<'_>) -> rusqlite::Result<UsageRecord> {
    Ok(UsageRecord {
        usage_id: row.get(0)?,
        source_type: decode_enum(1, row.get(1)?, SourceType::parse)?,
        source_reference: row.get(2)?,
        import_batch_id: row.get(3)?,
        period_start: row.get(4)?,
        period_end: row.get(5)?,
        territory_code: row.get(6)?,
        service_name: row.get(7)?,
        track_name: row.get(8)?,
        artist_name: row.get(9)?,
        album_name: row.get(10)?,
        isrc: row.get(11)?,
        iswc: row.get(12)?,
        upc: row.get(13)?,
        usage_type: decode_enum(14, row.get(14)?, UsageType::parse)?,
        units: row.get(15)?,
        gross_amount: decode_decimal(row, 16)?,
        fees: decode_decimal(row, 17)?,
        currency: row.get(18)?,
        exchange_rate: decode_decimal(row, 19)?,
        match_state: decode_enum(20, row.get(20)?, MatchState::parse)?,
        confidence: row.get(21)?,
        recording_id: row.get(22)?,
        work_id: row.get(23)?,
        statement_id: row.get(24)?,
        processed: row.get::<_, i64>(25)? != 0,
        active: row.get::<_, i64>(26)? != 0,
        created_at: row.get(27)?,
        updated_at: row.get(28)?,
    })
}

// ==========================================
// UsageRepository
// ==========================================
pub struct UsageRepository {
    conn: SharedConnection,
}

impl UsageRepository {
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

    /// 在事务中批量插入，返回新 ID（与输入顺序一致）
    pub fn batch_insert_tx(conn: &Connection, records: &[UsageRecord]) -> RepositoryResult<Vec<i64>> {
        let mut stmt = conn.prepare(
            r#"
            INSERT INTO usage_record (
                source_type, source_reference, import_batch_id, period_start, period_end,
                territory_code, service_name, track_name, artist_name, album_name, isrc, iswc, upc,
                usage_type, units, gross_amount, fees, currency, exchange_rate, match_state,
                confidence, recording_id, work_id, statement_id, processed, active,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28
            )
            "#,
        )?;

        let mut ids = Vec::with_capacity(records.len());
        for r in records {
            stmt.execute(params![
                r.source_type.as_str(),
                r.source_reference,
                r.import_batch_id,
                r.period_start,
                r.period_end,
                r.territory_code,
                r.service_name,
                r.track_name,
                r.artist_name,
                r.album_name,
                r.isrc,
                r.iswc,
                r.upc,
                r.usage_type.as_str(),
                r.units,
                encode_decimal(r.gross_amount),
                encode_decimal(r.fees),
                r.currency,
                encode_decimal(r.exchange_rate),
                r.match_state.as_str(),
                r.confidence,
                r.recording_id,
                r.work_id,
                r.statement_id,
                r.processed as i64,
                r.active as i64,
                r.created_at,
                r.updated_at,
            ])?;
            ids.push(conn.last_insert_rowid());
        }
        Ok(ids)
    }

    pub fn find_by_id_tx(conn: &Connection, usage_id: i64) -> RepositoryResult<UsageRecord> {
        let sql = format!("SELECT {} FROM usage_record WHERE usage_id = ?1", USAGE_COLUMNS);
        conn.query_row(&sql, params![usage_id], map_usage_row)
            .optional()?
            .ok_or_else(|| RepositoryError::not_found("UsageRecord", usage_id))
    }

    /// 结算单下的有效明细
    pub fn list_by_statement_tx(conn: &Connection, statement_id: i64) -> RepositoryResult<Vec<UsageRecord>> {
        let sql = format!(
            "SELECT {} FROM usage_record WHERE statement_id = ?1 AND active = 1 ORDER BY usage_id",
            USAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![statement_id], map_usage_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_by_batch_tx(conn: &Connection, batch_id: &str) -> RepositoryResult<Vec<UsageRecord>> {
        let sql = format!(
            "SELECT {} FROM usage_record WHERE import_batch_id = ?1 ORDER BY usage_id",
            USAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![batch_id], map_usage_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// 是否已存在相同去重键的有效记录
    pub fn exists_duplicate_tx(conn: &Connection, key: &UsageDuplicateKey) -> RepositoryResult<bool> {
        let found: Option<i64> = conn
            .query_row(
                r#"
                SELECT usage_id FROM usage_record
                WHERE source_type = ?1 AND period_start = ?2 AND period_end = ?3
                  AND track_name = ?4 AND artist_name = ?5 AND COALESCE(isrc, '') = ?6
                  AND active = 1
                LIMIT 1
                "#,
                params![
                    key.source_type.as_str(),
                    key.period_start,
                    key.period_end,
                    key.track_name,
                    key.artist_name,
                    key.isrc,
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// 更新匹配字段
    pub fn update_match_tx(
        conn: &Connection,
        usage_id: i64,
        state: MatchState,
        confidence: f64,
        recording_id: Option<i64>,
        work_id: Option<i64>,
    ) -> RepositoryResult<()> {
        let affected = conn.execute(
            r#"
            UPDATE usage_record
            SET match_state = ?2, confidence = ?3, recording_id = ?4, work_id = ?5, updated_at = ?6
            WHERE usage_id = ?1
            "#,
            params![usage_id, state.as_str(), confidence, recording_id, work_id, Utc::now()],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("UsageRecord", usage_id));
        }
        Ok(())
    }

    /// 仅更新匹配状态（锁定/解锁）
    pub fn update_match_state_tx(conn: &Connection, usage_id: i64, state: MatchState) -> RepositoryResult<()> {
        let affected = conn.execute(
            "UPDATE usage_record SET match_state = ?2, updated_at = ?3 WHERE usage_id = ?1",
            params![usage_id, state.as_str(), Utc::now()],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("UsageRecord", usage_id));
        }
        Ok(())
    }

    /// 更新金额（净额由读取方推导）
    pub fn update_amounts_tx(conn: &Connection, usage_id: i64, gross: Decimal, fees: Decimal) -> RepositoryResult<()> {
        let affected = conn.execute(
            "UPDATE usage_record SET gross_amount = ?2, fees = ?3, updated_at = ?4 WHERE usage_id = ?1",
            params![usage_id, encode_decimal(gross), encode_decimal(fees), Utc::now()],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("UsageRecord", usage_id));
        }
        Ok(())
    }

    /// 挂载/移除结算单
    pub fn set_statement_tx(
        conn: &Connection,
        usage_id: i64,
        statement_id: Option<i64>,
        processed: bool,
    ) -> RepositoryResult<()> {
        let affected = conn.execute(
            "UPDATE usage_record SET statement_id = ?2, processed = ?3, updated_at = ?4 WHERE usage_id = ?1",
            params![usage_id, statement_id, processed as i64, Utc::now()],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("UsageRecord", usage_id));
        }
        Ok(())
    }

    /// 同步结算单下全部明细的已处理标记
    pub fn set_processed_for_statement_tx(
        conn: &Connection,
        statement_id: i64,
        processed: bool,
    ) -> RepositoryResult<usize> {
        Ok(conn.execute(
            "UPDATE usage_record SET processed = ?2, updated_at = ?3 WHERE statement_id = ?1",
            params![statement_id, processed as i64, Utc::now()],
        )?)
    }

    pub fn deactivate_tx(conn: &Connection, usage_id: i64) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE usage_record SET active = 0, updated_at = ?2 WHERE usage_id = ?1",
            params![usage_id, Utc::now()],
        )?;
        Ok(())
    }

    pub fn delete_tx(conn: &Connection, usage_id: i64) -> RepositoryResult<()> {
        conn.execute("DELETE FROM usage_record WHERE usage_id = ?1", params![usage_id])?;
        Ok(())
    }

    // ==========================================
    // 独立操作（自行加锁）
    // ==========================================

    /// 插入单条记录
    pub fn insert(&self, record: &UsageRecord) -> RepositoryResult<i64> {
        record.validate().map_err(RepositoryError::ValidationError)?;
        let conn = self.get_conn()?;
        let ids = Self::batch_insert_tx(&conn, std::slice::from_ref(record))?;
        ids.first()
            .copied()
            .ok_or_else(|| RepositoryError::InternalError("插入未返回 ID".to_string()))
    }

    pub fn find_by_id(&self, usage_id: i64) -> RepositoryResult<UsageRecord> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, usage_id)
    }

    /// 按 ID 列表读取（保持输入顺序，跳过不存在的 ID）
    pub fn find_by_ids(&self, usage_ids: &[i64]) -> RepositoryResult<Vec<UsageRecord>> {
        let conn = self.get_conn()?;
        let mut records = Vec::with_capacity(usage_ids.len());
        for id in usage_ids {
            match Self::find_by_id_tx(&conn, *id) {
                Ok(r) => records.push(r),
                Err(RepositoryError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    /// 待自动匹配的记录: 有效、未匹配、未处理
    pub fn list_unmatched(&self, limit: usize) -> RepositoryResult<Vec<UsageRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM usage_record
            WHERE match_state = 'UNMATCHED' AND processed = 0 AND active = 1
            ORDER BY usage_id
            LIMIT ?1
            "#,
            USAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], map_usage_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_by_batch(&self, batch_id: &str) -> RepositoryResult<Vec<UsageRecord>> {
        let conn = self.get_conn()?;
        Self::list_by_batch_tx(&conn, batch_id)
    }

    pub fn list_by_statement(&self, statement_id: i64) -> RepositoryResult<Vec<UsageRecord>> {
        let conn = self.get_conn()?;
        Self::list_by_statement_tx(&conn, statement_id)
    }

    pub fn exists_duplicate(&self, key: &UsageDuplicateKey) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        Self::exists_duplicate_tx(&conn, key)
    }

    /// 有效记录数
    pub fn count_active(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM usage_record WHERE active = 1", [], |row| row.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    fn repo() -> UsageRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        UsageRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn record(track: &str) -> UsageRecord {
        let mut r = UsageRecord::reported(
            SourceType::Platform,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            track,
            "The Tides",
        );
        r.units = 1200;
        r.gross_amount = dec!(12.50);
        r.fees = dec!(2.35);
        r.isrc = Some("USABC1234567".to_string());
        r
    }

    #[test]
    fn test_insert_and_read_back() {
        let repo = repo();
        let id = repo.insert(&record("Blue Moon")).unwrap();
        let loaded = repo.find_by_id(id).unwrap();
        assert_eq!(loaded.usage_id, id);
        assert_eq!(loaded.track_name, "Blue Moon");
        assert_eq!(loaded.match_state, MatchState::Unmatched);
        assert_eq!(loaded.gross_amount, dec!(12.50));
        assert_eq!(loaded.net_amount(), dec!(10.15));
        assert!(loaded.active);
    }

    #[test]
    fn test_duplicate_lookup_ignores_inactive() {
        let repo = repo();
        let r = record("Blue Moon");
        let id = repo.insert(&r).unwrap();
        assert!(repo.exists_duplicate(&r.duplicate_key()).unwrap());

        {
            let conn = repo.get_conn().unwrap();
            UsageRepository::deactivate_tx(&conn, id).unwrap();
        }
        assert!(!repo.exists_duplicate(&r.duplicate_key()).unwrap());
    }

    #[test]
    fn test_list_unmatched_skips_matched() {
        let repo = repo();
        let a = repo.insert(&record("A")).unwrap();
        let b = repo.insert(&record("B")).unwrap();
        {
            let conn = repo.get_conn().unwrap();
            UsageRepository::update_match_tx(&conn, a, MatchState::AutoMatched, 0.8, None, None).unwrap();
        }
        let pending = repo.list_unmatched(10).unwrap();
        assert_eq!(pending.iter().map(|r| r.usage_id).collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn test_insert_rejects_invalid_record() {
        let repo = repo();
        let mut r = record("A");
        r.fees = dec!(-1);
        assert!(matches!(repo.insert(&r), Err(RepositoryError::ValidationError(_))));
    }
}
