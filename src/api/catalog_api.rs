// ==========================================
// 版权结算对账系统 - 曲库与匹配 API
// ==========================================
// 职责: 曲库协作方写入录音/作品，刷新匹配索引；人工匹配操作
// ==========================================

use crate::api::error::ApiResult;
use crate::domain::catalog::CatalogEntity;
use crate::domain::usage::{MatchStats, UsageRecord};
use crate::engine::{MatchResult, MatchingEngine, RemovalOutcome, UsageService};
use crate::repository::{CatalogRepository, UsageRepository};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

pub struct CatalogApi {
    catalog_repo: Arc<CatalogRepository>,
    usage_repo: Arc<UsageRepository>,
    matching: Arc<MatchingEngine>,
    usage_service: Arc<UsageService>,
}

impl CatalogApi {
    pub fn new(
        catalog_repo: Arc<CatalogRepository>,
        usage_repo: Arc<UsageRepository>,
        matching: Arc<MatchingEngine>,
        usage_service: Arc<UsageService>,
    ) -> Self {
        Self {
            catalog_repo,
            usage_repo,
            matching,
            usage_service,
        }
    }

    // ==========================================
    // 曲库写入（写入后刷新索引快照）
    // ==========================================

    pub fn add_work(&self, title: &str, iswc: Option<&str>) -> ApiResult<i64> {
        let work_id = self.catalog_repo.insert_work(title, iswc)?;
        self.matching.refresh_index(&self.catalog_repo)?;
        Ok(work_id)
    }

    pub fn add_recording(
        &self,
        title: &str,
        isrc: Option<&str>,
        work_id: Option<i64>,
        artists: &[&str],
    ) -> ApiResult<i64> {
        let recording_id = self.catalog_repo.insert_recording(title, isrc, work_id, artists)?;
        self.matching.refresh_index(&self.catalog_repo)?;
        Ok(recording_id)
    }

    pub fn remove_recording(&self, recording_id: i64) -> ApiResult<()> {
        self.catalog_repo.delete_recording(recording_id)?;
        self.matching.refresh_index(&self.catalog_repo)?;
        Ok(())
    }

    /// 重新加载索引，返回录音数
    pub fn refresh_index(&self) -> ApiResult<usize> {
        let count = self.matching.refresh_index(&self.catalog_repo)?;
        info!(recordings = count, "曲库索引已刷新");
        Ok(count)
    }

    // ==========================================
    // 匹配
    // ==========================================

    pub fn get_usage(&self, usage_id: i64) -> ApiResult<UsageRecord> {
        Ok(self.usage_repo.find_by_id(usage_id)?)
    }

    /// 只读匹配预测（不写入）
    pub fn predict_match(&self, usage_id: i64) -> ApiResult<Option<MatchResult>> {
        let record = self.usage_repo.find_by_id(usage_id)?;
        Ok(self.matching.match_record(&record)?)
    }

    pub fn auto_match(&self, usage_id: i64) -> ApiResult<Option<MatchResult>> {
        Ok(self.matching.auto_match(usage_id)?)
    }

    pub fn auto_match_pending(&self, batch_size: usize) -> ApiResult<MatchStats> {
        Ok(self.matching.auto_match_batch(batch_size)?)
    }

    pub fn match_recording(&self, usage_id: i64, recording_id: i64) -> ApiResult<()> {
        Ok(self.matching.manual_match(usage_id, CatalogEntity::Recording(recording_id))?)
    }

    pub fn match_work(&self, usage_id: i64, work_id: i64) -> ApiResult<()> {
        Ok(self.matching.manual_match(usage_id, CatalogEntity::Work(work_id))?)
    }

    pub fn lock(&self, usage_id: i64) -> ApiResult<()> {
        Ok(self.matching.lock(usage_id)?)
    }

    pub fn unlock(&self, usage_id: i64) -> ApiResult<()> {
        Ok(self.matching.unlock(usage_id)?)
    }

    pub fn reset(&self, usage_id: i64) -> ApiResult<()> {
        Ok(self.matching.reset(usage_id)?)
    }

    // ==========================================
    // 明细维护
    // ==========================================

    pub fn correct_amounts(&self, usage_id: i64, gross: Decimal, fees: Decimal) -> ApiResult<UsageRecord> {
        Ok(self.usage_service.correct_amounts(usage_id, gross, fees)?)
    }

    pub fn remove_usage(&self, usage_id: i64) -> ApiResult<RemovalOutcome> {
        Ok(self.usage_service.remove_usage(usage_id)?)
    }
}
