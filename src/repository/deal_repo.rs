// ==========================================
// 版权结算对账系统 - 合约 Repository
// ==========================================
// 职责: deal 表读写（版税阶梯以 JSON 存储，读取时重新校验）
// ==========================================

use crate::db::{open_shared_connection, SharedConnection};
use crate::domain::deal::{Deal, EscalationSchedule, RateEscalation};
use crate::domain::types::{Bucket, DealStatus};
use crate::repository::{decode_decimal, decode_enum, encode_decimal};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::MutexGuard;

const DEAL_COLUMNS: &str =
    "deal_id, party_id, name, status, default_bucket, cross_collateralize, royalty_rate, escalations_json";

fn map_deal_row(row: &Row<'_>) -> rusqlite::Result<Deal> {
    let raw: String = row.get(7)?;
    let tiers: Vec<RateEscalation> = serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let escalations = EscalationSchedule::new(tiers).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(Deal {
        deal_id: row.get(0)?,
        party_id: row.get(1)?,
        name: row.get(2)?,
        status: decode_enum(3, row.get(3)?, DealStatus::parse)?,
        default_bucket: decode_enum(4, row.get(4)?, Bucket::parse)?,
        cross_collateralize: row.get::<_, i64>(5)? != 0,
        royalty_rate: decode_decimal(row, 6)?,
        escalations,
    })
}

// ==========================================
// DealRepository
// ==========================================
pub struct DealRepository {
    conn: SharedConnection,
}

impl DealRepository {
    /// 创建新的 Repository 实例（打开连接并建表）
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_shared_connection(db_path)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新增合约（deal_id 忽略，返回新 ID）
    pub fn insert(&self, deal: &Deal) -> RepositoryResult<i64> {
        deal.validate().map_err(RepositoryError::ValidationError)?;
        let escalations_json = serde_json::to_string(&deal.escalations)
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO deal (party_id, name, status, default_bucket, cross_collateralize, royalty_rate, escalations_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                deal.party_id,
                deal.name,
                deal.status.as_str(),
                deal.default_bucket.as_str(),
                deal.cross_collateralize as i64,
                encode_decimal(deal.royalty_rate),
                escalations_json,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn find_by_id_tx(conn: &Connection, deal_id: i64) -> RepositoryResult<Deal> {
        let sql = format!("SELECT {} FROM deal WHERE deal_id = ?1", DEAL_COLUMNS);
        conn.query_row(&sql, params![deal_id], map_deal_row)
            .optional()?
            .ok_or_else(|| RepositoryError::not_found("Deal", deal_id))
    }

    pub fn find_by_id(&self, deal_id: i64) -> RepositoryResult<Deal> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, deal_id)
    }

    /// 收款方的全部合约（按 ID 升序）
    pub fn list_by_party_tx(conn: &Connection, party_id: i64) -> RepositoryResult<Vec<Deal>> {
        let sql = format!("SELECT {} FROM deal WHERE party_id = ?1 ORDER BY deal_id", DEAL_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![party_id], map_deal_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_by_party(&self, party_id: i64) -> RepositoryResult<Vec<Deal>> {
        let conn = self.get_conn()?;
        Self::list_by_party_tx(&conn, party_id)
    }

    /// 更新合约状态
    pub fn update_status(&self, deal_id: i64, status: DealStatus) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE deal SET status = ?2 WHERE deal_id = ?1",
            params![deal_id, status.as_str()],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("Deal", deal_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_escalations_persist_as_typed_list() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        let repo = DealRepository::from_connection(Arc::new(Mutex::new(conn)));

        let deal = Deal {
            deal_id: 0,
            party_id: 3,
            name: "Debut".to_string(),
            status: DealStatus::Signed,
            default_bucket: Bucket::Video,
            cross_collateralize: true,
            royalty_rate: dec!(14),
            escalations: EscalationSchedule::new(vec![
                RateEscalation { threshold_units: 10_000, rate: dec!(16) },
            ])
            .unwrap(),
        };
        let id = repo.insert(&deal).unwrap();
        let loaded = repo.find_by_id(id).unwrap();
        assert_eq!(loaded.default_bucket, Bucket::Video);
        assert!(loaded.cross_collateralize);
        assert_eq!(loaded.effective_rate(12_000), dec!(16));
        assert_eq!(loaded.effective_rate(0), dec!(14));
        assert_eq!(repo.list_by_party(3).unwrap().len(), 1);
        assert!(repo.list_by_party(4).unwrap().is_empty());
    }
}
