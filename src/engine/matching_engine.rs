// ==========================================
// 版权结算对账系统 - 匹配引擎 (Matching Engine)
// ==========================================
// 优先级（命中即止，不混用）:
// 1. ISRC 精确匹配录音 → 置信度 1.0，方式 CODE
// 2. ISWC 精确匹配作品 → 置信度 1.0，方式 CODE
// 3. 模糊匹配（规范化曲目+艺人）→ 唯一候选 0.8，方式 FUZZY；
//    无候选或多个候选 → 无可信匹配（不在并列中猜测）
// 红线: LOCKED 记录永不被自动匹配覆盖
// ==========================================

use crate::domain::catalog::CatalogEntity;
use crate::domain::types::MatchState;
use crate::domain::usage::{MatchStats, UsageRecord};
use crate::engine::catalog_index::CatalogIndex;
use crate::error::{AppError, AppResult};
use crate::repository::{CatalogRepository, UsageRepository};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument, warn};

// ==========================================
// MatchConfig - 匹配参数（构造时注入）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    pub code_confidence: f64,
    pub fuzzy_confidence: f64,
    /// 自动采纳 & 试运行“可匹配”计数的阈值
    pub accept_threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            code_confidence: 1.0,
            fuzzy_confidence: 0.8,
            accept_threshold: 0.7,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [
            ("code_confidence", self.code_confidence),
            ("fuzzy_confidence", self.fuzzy_confidence),
            ("accept_threshold", self.accept_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(format!("{} 超出 [0,1]: {}", name, v));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchMethod {
    Code,
    Fuzzy,
}

/// 匹配结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub entity: CatalogEntity,
    pub recording_id: Option<i64>,
    pub work_id: Option<i64>,
    pub confidence: f64,
    pub method: MatchMethod,
}

// ==========================================
// MatchingEngine
// ==========================================
pub struct MatchingEngine {
    index: RwLock<Arc<CatalogIndex>>,
    usage_repo: Arc<UsageRepository>,
    config: MatchConfig,
}

impl MatchingEngine {
    pub fn new(index: CatalogIndex, usage_repo: Arc<UsageRepository>, config: MatchConfig) -> Self {
        Self {
            index: RwLock::new(Arc::new(index)),
            usage_repo,
            config,
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// 当前索引快照
    pub fn index(&self) -> AppResult<Arc<CatalogIndex>> {
        self.index
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|e| AppError::Internal(format!("索引锁获取失败: {}", e)))
    }

    /// 曲库变更后重新加载索引
    pub fn refresh_index(&self, catalog_repo: &CatalogRepository) -> AppResult<usize> {
        let fresh = CatalogIndex::load(catalog_repo)?;
        let count = fresh.recording_count();
        let mut guard = self
            .index
            .write()
            .map_err(|e| AppError::Internal(format!("索引锁获取失败: {}", e)))?;
        *guard = Arc::new(fresh);
        info!(recordings = count, "曲库索引已刷新");
        Ok(count)
    }

    // ==========================================
    // 纯匹配（无副作用）
    // ==========================================

    /// 对单条记录求匹配结果
    pub fn match_with(&self, index: &CatalogIndex, record: &UsageRecord) -> Option<MatchResult> {
        // 1. ISRC
        if let Some(recording) = record.isrc.as_deref().and_then(|code| index.lookup_isrc(code)) {
            return Some(MatchResult {
                entity: CatalogEntity::Recording(recording.recording_id),
                recording_id: Some(recording.recording_id),
                work_id: recording.work_id,
                confidence: self.config.code_confidence,
                method: MatchMethod::Code,
            });
        }

        // 2. ISWC
        if let Some(work) = record.iswc.as_deref().and_then(|code| index.lookup_iswc(code)) {
            return Some(MatchResult {
                entity: CatalogEntity::Work(work.work_id),
                recording_id: None,
                work_id: Some(work.work_id),
                confidence: self.config.code_confidence,
                method: MatchMethod::Code,
            });
        }

        // 3. 模糊: 仅唯一候选
        let candidates = index.candidates(&record.track_name, &record.artist_name);
        match candidates.as_slice() {
            [only] => Some(MatchResult {
                entity: CatalogEntity::Recording(only.recording.recording_id),
                recording_id: Some(only.recording.recording_id),
                work_id: only.recording.work_id,
                confidence: self.config.fuzzy_confidence,
                method: MatchMethod::Fuzzy,
            }),
            [] => None,
            many => {
                debug!(
                    track = %record.track_name,
                    artist = %record.artist_name,
                    candidates = many.len(),
                    "模糊匹配存在多个候选，不做猜测"
                );
                None
            }
        }
    }

    /// 对单条记录求匹配结果（使用当前索引）
    pub fn match_record(&self, record: &UsageRecord) -> AppResult<Option<MatchResult>> {
        let index = self.index()?;
        Ok(self.match_with(&index, record))
    }

    /// 结果是否达到采纳阈值
    pub fn is_acceptable(&self, result: &MatchResult) -> bool {
        result.confidence >= self.config.accept_threshold
    }

    // ==========================================
    // 写入匹配结果
    // ==========================================

    /// 自动匹配单条记录
    ///
    /// # 返回
    /// - Ok(Some): 已写入自动匹配结果
    /// - Ok(None): 无可信匹配，记录不变
    /// - Err(Precondition): 记录已锁定
    pub fn auto_match(&self, usage_id: i64) -> AppResult<Option<MatchResult>> {
        let record = self.usage_repo.find_by_id(usage_id)?;
        if record.is_locked() {
            return Err(AppError::precondition(format!(
                "使用明细 {} 已锁定，不能重新匹配",
                usage_id
            )));
        }
        let index = self.index()?;
        self.apply_auto_match(&index, &record)
    }

    fn apply_auto_match(&self, index: &CatalogIndex, record: &UsageRecord) -> AppResult<Option<MatchResult>> {
        let result = match self.match_with(index, record) {
            Some(r) if self.is_acceptable(&r) => r,
            _ => return Ok(None),
        };

        let conn = self.usage_repo.get_conn()?;
        // 写入前复核锁定状态（读与写之间可能被人工锁定）
        let current = UsageRepository::find_by_id_tx(&conn, record.usage_id)?;
        if current.is_locked() {
            return Ok(None);
        }
        UsageRepository::update_match_tx(
            &conn,
            record.usage_id,
            MatchState::AutoMatched,
            result.confidence,
            result.recording_id,
            result.work_id,
        )?;
        Ok(Some(result))
    }

    /// 批量自动匹配（逐条独立，单条失败不影响其余记录）
    ///
    /// 锁定记录直接跳过，不计入 processed
    pub fn auto_match_records(&self, records: &[UsageRecord]) -> AppResult<MatchStats> {
        let index = self.index()?;
        let mut stats = MatchStats::default();

        for record in records {
            if record.is_locked() {
                continue;
            }
            stats.processed += 1;
            match self.apply_auto_match(&index, record) {
                Ok(Some(_)) => stats.matched += 1,
                Ok(None) => {}
                Err(e) => {
                    stats.failed += 1;
                    warn!(usage_id = record.usage_id, error = %e, "自动匹配失败，跳过该记录");
                }
            }
        }
        Ok(stats)
    }

    /// 对指定 ID 批量自动匹配
    pub fn auto_match_ids(&self, usage_ids: &[i64]) -> AppResult<MatchStats> {
        let records = self.usage_repo.find_by_ids(usage_ids)?;
        self.auto_match_records(&records)
    }

    /// 对未匹配、未处理的记录批量自动匹配
    #[instrument(skip(self))]
    pub fn auto_match_batch(&self, batch_size: usize) -> AppResult<MatchStats> {
        let records = self.usage_repo.list_unmatched(batch_size)?;
        let stats = self.auto_match_records(&records)?;
        info!(
            processed = stats.processed,
            matched = stats.matched,
            failed = stats.failed,
            "批量自动匹配完成"
        );
        Ok(stats)
    }

    // ==========================================
    // 人工操作
    // ==========================================

    /// 人工指定匹配实体
    pub fn manual_match(&self, usage_id: i64, entity: CatalogEntity) -> AppResult<()> {
        let index = self.index()?;
        let (recording_id, work_id) = match entity {
            CatalogEntity::Recording(id) => {
                let recording = index
                    .recording(id)
                    .ok_or_else(|| AppError::validation(format!("录音不存在: {}", id)))?;
                (Some(id), recording.work_id)
            }
            CatalogEntity::Work(id) => {
                index
                    .work(id)
                    .ok_or_else(|| AppError::validation(format!("作品不存在: {}", id)))?;
                (None, Some(id))
            }
        };

        let conn = self.usage_repo.get_conn()?;
        let record = UsageRepository::find_by_id_tx(&conn, usage_id)?;
        if record.is_locked() {
            return Err(AppError::precondition(format!("使用明细 {} 已锁定", usage_id)));
        }
        UsageRepository::update_match_tx(&conn, usage_id, MatchState::ManuallyMatched, 1.0, recording_id, work_id)?;
        info!(usage_id = usage_id, entity = ?entity, "人工匹配");
        Ok(())
    }

    /// 锁定记录（冻结匹配字段）
    pub fn lock(&self, usage_id: i64) -> AppResult<()> {
        let conn = self.usage_repo.get_conn()?;
        UsageRepository::find_by_id_tx(&conn, usage_id)?;
        UsageRepository::update_match_state_tx(&conn, usage_id, MatchState::Locked)?;
        info!(usage_id = usage_id, "使用明细已锁定");
        Ok(())
    }

    /// 显式解锁: 有匹配实体 → 人工匹配，否则 → 未匹配
    pub fn unlock(&self, usage_id: i64) -> AppResult<()> {
        let conn = self.usage_repo.get_conn()?;
        let record = UsageRepository::find_by_id_tx(&conn, usage_id)?;
        if !record.is_locked() {
            return Err(AppError::precondition(format!("使用明细 {} 未锁定", usage_id)));
        }
        let next = if record.matched_entity().is_some() {
            MatchState::ManuallyMatched
        } else {
            MatchState::Unmatched
        };
        UsageRepository::update_match_state_tx(&conn, usage_id, next)?;
        info!(usage_id = usage_id, state = %next, "使用明细已解锁");
        Ok(())
    }

    /// 清除匹配字段（锁定时拒绝）
    pub fn reset(&self, usage_id: i64) -> AppResult<()> {
        let conn = self.usage_repo.get_conn()?;
        let record = UsageRepository::find_by_id_tx(&conn, usage_id)?;
        if record.is_locked() {
            return Err(AppError::precondition(format!(
                "使用明细 {} 已锁定，不能重置匹配",
                usage_id
            )));
        }
        UsageRepository::update_match_tx(&conn, usage_id, MatchState::Unmatched, 0.0, None, None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{Recording, Work};
    use crate::domain::types::SourceType;
    use chrono::NaiveDate;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn engine() -> MatchingEngine {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        let repo = Arc::new(UsageRepository::from_connection(Arc::new(Mutex::new(conn))));
        let index = CatalogIndex::from_parts(
            vec![
                Recording {
                    recording_id: 1,
                    title: "Blue Moon".to_string(),
                    isrc: Some("USABC1234567".to_string()),
                    work_id: Some(7),
                    artists: vec!["The Tides".to_string()],
                },
                Recording {
                    recording_id: 2,
                    title: "Harbour Lights".to_string(),
                    isrc: None,
                    work_id: None,
                    artists: vec!["Ana Ruiz".to_string()],
                },
                Recording {
                    recording_id: 3,
                    title: "Harbour Lights".to_string(),
                    isrc: None,
                    work_id: None,
                    artists: vec!["Ana Ruiz".to_string(), "Leo".to_string()],
                },
            ],
            vec![Work { work_id: 7, title: "Blue Moon".to_string(), iswc: Some("T1234567890".to_string()) }],
        );
        MatchingEngine::new(index, repo, MatchConfig::default())
    }

    fn record(track: &str, artist: &str) -> UsageRecord {
        UsageRecord::reported(
            SourceType::Distributor,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            track,
            artist,
        )
    }

    #[test]
    fn test_isrc_wins_regardless_of_text() {
        let engine = engine();
        let mut r = record("Completely Different", "Nobody");
        r.isrc = Some("USABC1234567".to_string());
        let result = engine.match_record(&r).unwrap().unwrap();
        assert_eq!(result.entity, CatalogEntity::Recording(1));
        assert_eq!(result.work_id, Some(7));
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.method, MatchMethod::Code);
    }

    #[test]
    fn test_isrc_outranks_fuzzy() {
        let engine = engine();
        let mut r = record("Harbour Lights", "Leo");
        r.isrc = Some("USABC1234567".to_string());
        let result = engine.match_record(&r).unwrap().unwrap();
        assert_eq!(result.recording_id, Some(1));
    }

    #[test]
    fn test_iswc_match_sets_work_only() {
        let engine = engine();
        let mut r = record("Unknown", "Unknown");
        r.iswc = Some("T-123456789-0".to_string());
        let result = engine.match_record(&r).unwrap().unwrap();
        assert_eq!(result.entity, CatalogEntity::Work(7));
        assert_eq!(result.recording_id, None);
    }

    #[test]
    fn test_fuzzy_single_candidate() {
        let engine = engine();
        let result = engine.match_record(&record("blue moon!", "THE TIDES")).unwrap().unwrap();
        assert_eq!(result.recording_id, Some(1));
        assert_eq!(result.confidence, 0.8);
        assert_eq!(result.method, MatchMethod::Fuzzy);
    }

    #[test]
    fn test_fuzzy_tie_is_no_match() {
        let engine = engine();
        assert!(engine.match_record(&record("Harbour Lights", "Ana Ruiz")).unwrap().is_none());
        // 艺人收窄后唯一
        let result = engine.match_record(&record("Harbour Lights", "Leo")).unwrap().unwrap();
        assert_eq!(result.recording_id, Some(3));
    }

    #[test]
    fn test_matching_is_deterministic() {
        let engine = engine();
        let r = record("Blue Moon", "The Tides");
        let first = engine.match_record(&r).unwrap();
        for _ in 0..5 {
            assert_eq!(engine.match_record(&r).unwrap(), first);
        }
    }

    #[test]
    fn test_locked_record_is_untouched_by_batch() {
        let engine = engine();
        let id = engine.usage_repo.insert(&record("Blue Moon", "The Tides")).unwrap();
        engine.lock(id).unwrap();
        let before = engine.usage_repo.find_by_id(id).unwrap();

        let stats = engine.auto_match_ids(&[id]).unwrap();
        assert_eq!(stats.matched, 0);
        let after = engine.usage_repo.find_by_id(id).unwrap();
        assert_eq!(after.match_state, MatchState::Locked);
        assert_eq!(after.recording_id, before.recording_id);
        assert_eq!(after.confidence, before.confidence);

        assert!(matches!(engine.auto_match(id), Err(AppError::Precondition(_))));
        assert!(matches!(engine.reset(id), Err(AppError::Precondition(_))));
    }

    #[test]
    fn test_batch_counts_and_unlock() {
        let engine = engine();
        let a = engine.usage_repo.insert(&record("Blue Moon", "The Tides")).unwrap();
        let b = engine.usage_repo.insert(&record("Nothing Like It", "Nobody")).unwrap();

        let stats = engine.auto_match_batch(100).unwrap();
        assert_eq!(stats, MatchStats { processed: 2, matched: 1, failed: 0 });
        assert_eq!(engine.usage_repo.find_by_id(a).unwrap().match_state, MatchState::AutoMatched);
        assert_eq!(engine.usage_repo.find_by_id(b).unwrap().match_state, MatchState::Unmatched);

        engine.lock(a).unwrap();
        engine.unlock(a).unwrap();
        assert_eq!(engine.usage_repo.find_by_id(a).unwrap().match_state, MatchState::ManuallyMatched);

        engine.reset(a).unwrap();
        let cleared = engine.usage_repo.find_by_id(a).unwrap();
        assert_eq!(cleared.match_state, MatchState::Unmatched);
        assert_eq!(cleared.recording_id, None);
    }

    #[test]
    fn test_manual_match_validates_entity() {
        let engine = engine();
        let id = engine.usage_repo.insert(&record("X", "Y")).unwrap();
        assert!(matches!(
            engine.manual_match(id, CatalogEntity::Recording(99)),
            Err(AppError::Validation(_))
        ));
        engine.manual_match(id, CatalogEntity::Recording(1)).unwrap();
        let r = engine.usage_repo.find_by_id(id).unwrap();
        assert_eq!(r.match_state, MatchState::ManuallyMatched);
        assert_eq!(r.work_id, Some(7));
    }
}
