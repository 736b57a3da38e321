// ==========================================
// 版权结算对账系统 - 曲库 Repository
// ==========================================
// 职责: 录音/作品的写入（曲库协作方）与全量读取（构建索引）
// 红线: Repository 不含业务规则，只做数据 CRUD + 编码格式校验
// ==========================================

use crate::db::{open_shared_connection, SharedConnection};
use crate::domain::catalog::{normalize_isrc, normalize_iswc, normalize_optional_code, Recording, Work};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::MutexGuard;

// ==========================================
// CatalogRepository
// ==========================================
pub struct CatalogRepository {
    conn: SharedConnection,
}

impl CatalogRepository {
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

    // ==========================================
    // 写入（曲库协作方）
    // ==========================================

    /// 新增作品
    ///
    /// # 参数
    /// - title: 作品名
    /// - iswc: ISWC（可选，格式错误返回 ValidationError）
    pub fn insert_work(&self, title: &str, iswc: Option<&str>) -> RepositoryResult<i64> {
        let iswc = normalize_optional_code(iswc, normalize_iswc).map_err(RepositoryError::ValidationError)?;
        if title.trim().is_empty() {
            return Err(RepositoryError::ValidationError("作品名不能为空".to_string()));
        }

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO catalog_work (title, iswc) VALUES (?1, ?2)",
            params![title.trim(), iswc],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 新增录音（含主艺人列表）
    pub fn insert_recording(
        &self,
        title: &str,
        isrc: Option<&str>,
        work_id: Option<i64>,
        artists: &[&str],
    ) -> RepositoryResult<i64> {
        let isrc = normalize_optional_code(isrc, normalize_isrc).map_err(RepositoryError::ValidationError)?;
        if title.trim().is_empty() {
            return Err(RepositoryError::ValidationError("录音名不能为空".to_string()));
        }

        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO catalog_recording (title, isrc, work_id) VALUES (?1, ?2, ?3)",
            params![title.trim(), isrc, work_id],
        )?;
        let recording_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO catalog_recording_artist (recording_id, position, artist_name) VALUES (?1, ?2, ?3)",
            )?;
            for (position, artist) in artists.iter().enumerate() {
                stmt.execute(params![recording_id, position as i64, artist.trim()])?;
            }
        }

        tx.commit()?;
        Ok(recording_id)
    }

    /// 删除录音（ID 不会被复用）
    pub fn delete_recording(&self, recording_id: i64) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "DELETE FROM catalog_recording WHERE recording_id = ?1",
            params![recording_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("Recording", recording_id));
        }
        Ok(())
    }

    // ==========================================
    // 读取
    // ==========================================

    /// 读取全部录音（含艺人，按 ID 升序）
    pub fn list_recordings(&self) -> RepositoryResult<Vec<Recording>> {
        let conn = self.get_conn()?;

        let mut artists: HashMap<i64, Vec<String>> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT recording_id, artist_name FROM catalog_recording_artist ORDER BY recording_id, position",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
            for row in rows {
                let (recording_id, name) = row?;
                artists.entry(recording_id).or_default().push(name);
            }
        }

        let mut stmt = conn.prepare(
            "SELECT recording_id, title, isrc, work_id FROM catalog_recording ORDER BY recording_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Recording {
                recording_id: row.get(0)?,
                title: row.get(1)?,
                isrc: row.get(2)?,
                work_id: row.get(3)?,
                artists: Vec::new(),
            })
        })?;

        let mut recordings = Vec::new();
        for row in rows {
            let mut recording = row?;
            recording.artists = artists.remove(&recording.recording_id).unwrap_or_default();
            recordings.push(recording);
        }
        Ok(recordings)
    }

    /// 读取全部作品（按 ID 升序）
    pub fn list_works(&self) -> RepositoryResult<Vec<Work>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT work_id, title, iswc FROM catalog_work ORDER BY work_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Work {
                work_id: row.get(0)?,
                title: row.get(1)?,
                iswc: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// 录音所属作品
    pub fn recording_work_id(&self, recording_id: i64) -> RepositoryResult<Option<i64>> {
        let conn = self.get_conn()?;
        let work_id: Option<Option<i64>> = conn
            .query_row(
                "SELECT work_id FROM catalog_recording WHERE recording_id = ?1",
                params![recording_id],
                |row| row.get(0),
            )
            .optional()?;
        work_id.ok_or_else(|| RepositoryError::not_found("Recording", recording_id))
    }

    /// 作品是否存在
    pub fn work_exists(&self, work_id: i64) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT work_id FROM catalog_work WHERE work_id = ?1",
                params![work_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn repo() -> CatalogRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        CatalogRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_insert_and_list_recordings_with_artists() {
        let repo = repo();
        let work_id = repo.insert_work("Blue Moon", Some("T-123456789-0")).unwrap();
        let rec_id = repo
            .insert_recording("Blue Moon", Some("US-ABC-12-34567"), Some(work_id), &["The Tides", "Ana Ruiz"])
            .unwrap();

        let recordings = repo.list_recordings().unwrap();
        assert_eq!(recordings.len(), 1);
        assert_eq!(recordings[0].recording_id, rec_id);
        assert_eq!(recordings[0].isrc.as_deref(), Some("USABC1234567"));
        assert_eq!(recordings[0].artists, vec!["The Tides", "Ana Ruiz"]);
        assert_eq!(repo.recording_work_id(rec_id).unwrap(), Some(work_id));

        let works = repo.list_works().unwrap();
        assert_eq!(works[0].iswc.as_deref(), Some("T1234567890"));
    }

    #[test]
    fn test_malformed_isrc_is_validation_error() {
        let repo = repo();
        let err = repo.insert_recording("X", Some("BAD"), None, &[]).unwrap_err();
        assert!(matches!(err, RepositoryError::ValidationError(_)));
    }

    #[test]
    fn test_recording_ids_are_not_reused() {
        let repo = repo();
        let first = repo.insert_recording("A", None, None, &["X"]).unwrap();
        repo.delete_recording(first).unwrap();
        let second = repo.insert_recording("B", None, None, &["Y"]).unwrap();
        assert!(second > first);
    }
}
