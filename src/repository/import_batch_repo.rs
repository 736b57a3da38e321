// ==========================================
// 版权结算对账系统 - 导入批次 Repository
// ==========================================
// 职责: import_batch 审计记录（进度/终态/撤销依据）
// ==========================================

use crate::db::{open_shared_connection, SharedConnection};
use crate::domain::import::{ImportBatch, ImportSessionState, ImportSummary};
use crate::domain::types::SourceType;
use crate::repository::decode_enum;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::MutexGuard;

// ==========================================
// ImportBatchRepository
// ==========================================
pub struct ImportBatchRepository {
    conn: SharedConnection,
}

impl ImportBatchRepository {
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

    /// 登记批次（导入开始时）
    pub fn insert(&self, batch: &ImportBatch) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO import_batch (
                batch_id, file_name, source_type, period_start, period_end, state,
                total_rows, imported_rows, matched_rows, error_rows, skipped_rows,
                started_at, finished_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                batch.batch_id,
                batch.file_name,
                batch.source_type.as_str(),
                batch.period_start,
                batch.period_end,
                batch.state.as_str(),
                batch.total_rows,
                batch.imported_rows,
                batch.matched_rows,
                batch.error_rows,
                batch.skipped_rows,
                batch.started_at,
                batch.finished_at,
            ],
        )?;
        Ok(())
    }

    /// 写入进度/终态
    pub fn update_progress(
        &self,
        batch_id: &str,
        state: ImportSessionState,
        summary: &ImportSummary,
    ) -> RepositoryResult<()> {
        let finished_at = match state {
            ImportSessionState::Completed | ImportSessionState::Failed => Some(Utc::now()),
            _ => None,
        };
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE import_batch SET
                state = ?2, total_rows = ?3, imported_rows = ?4, matched_rows = ?5,
                error_rows = ?6, skipped_rows = ?7, finished_at = ?8
            WHERE batch_id = ?1
            "#,
            params![
                batch_id,
                state.as_str(),
                summary.total as i64,
                summary.imported as i64,
                summary.matched as i64,
                summary.errors as i64,
                summary.skipped_duplicates as i64,
                finished_at,
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("ImportBatch", batch_id));
        }
        Ok(())
    }

    pub fn find_by_id(&self, batch_id: &str) -> RepositoryResult<ImportBatch> {
        let conn = self.get_conn()?;
        conn.query_row(
            r#"
            SELECT batch_id, file_name, source_type, period_start, period_end, state,
                   total_rows, imported_rows, matched_rows, error_rows, skipped_rows,
                   started_at, finished_at
            FROM import_batch WHERE batch_id = ?1
            "#,
            params![batch_id],
            |row| {
                Ok(ImportBatch {
                    batch_id: row.get(0)?,
                    file_name: row.get(1)?,
                    source_type: decode_enum(2, row.get(2)?, SourceType::parse)?,
                    period_start: row.get(3)?,
                    period_end: row.get(4)?,
                    state: decode_enum(5, row.get(5)?, ImportSessionState::parse)?,
                    total_rows: row.get(6)?,
                    imported_rows: row.get(7)?,
                    matched_rows: row.get(8)?,
                    error_rows: row.get(9)?,
                    skipped_rows: row.get(10)?,
                    started_at: row.get(11)?,
                    finished_at: row.get(12)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| RepositoryError::not_found("ImportBatch", batch_id))
    }
}
