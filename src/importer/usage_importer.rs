// ==========================================
// 版权结算对账系统 - 使用报表导入器实现
// ==========================================
// 流程: 解析 → 列映射 → 类型转换/必填校验 → 去重 → 分批落库 → 自动匹配
// 红线: 文件级错误在处理任何行之前中止
//       行级错误计数 + 记录前 N 条后跳过
//       每批独立提交，后续失败不回滚已提交批次
//       批次之间让出执行权，取消请求在下一批开始前生效
// ==========================================

use crate::config::ImportConfigReader;
use crate::domain::import::{
    new_batch_id, FilePreview, ImportBatch, ImportSessionState, ImportSummary,
};
use crate::domain::usage::{UsageDuplicateKey, UsageRecord};
use crate::engine::MatchingEngine;
use crate::importer::column_mapping::ResolvedMapping;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::FieldMapper;
use crate::importer::file_parser::{RawRow, UniversalFileParser};
use crate::importer::session::ImportSession;
use crate::importer::usage_importer_trait::{ImportRequest, UsageImporter};
use crate::repository::{ImportBatchRepository, UsageRepository};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// 单次运行的配置快照
#[derive(Debug, Clone, Copy)]
struct RunSettings {
    batch_size: usize,
    error_log_limit: usize,
}

// ==========================================
// UsageImporterImpl
// ==========================================
pub struct UsageImporterImpl<C>
where
    C: ImportConfigReader,
{
    // 数据访问层
    usage_repo: Arc<UsageRepository>,
    batch_repo: Arc<ImportBatchRepository>,

    // 匹配引擎（试运行只读，提交模式写匹配结果）
    matching: Arc<MatchingEngine>,

    // 配置读取器
    config: C,

    parser: UniversalFileParser,
}

impl<C> UsageImporterImpl<C>
where
    C: ImportConfigReader,
{
    pub fn new(
        usage_repo: Arc<UsageRepository>,
        batch_repo: Arc<ImportBatchRepository>,
        matching: Arc<MatchingEngine>,
        config: C,
    ) -> Self {
        Self {
            usage_repo,
            batch_repo,
            matching,
            config,
            parser: UniversalFileParser,
        }
    }

    async fn load_settings(&self) -> ImportResult<RunSettings> {
        let batch_size = self
            .config
            .get_batch_size()
            .await
            .map_err(|e| ImportError::InternalError(format!("读取批量大小失败: {}", e)))?;
        let error_log_limit = self
            .config
            .get_error_log_limit()
            .await
            .map_err(|e| ImportError::InternalError(format!("读取错误日志上限失败: {}", e)))?;
        Ok(RunSettings {
            batch_size: batch_size.max(1),
            error_log_limit,
        })
    }

    // ==========================================
    // 试运行: 完整回放校验与模拟匹配，不写任何数据
    // ==========================================
    fn simulate(
        &self,
        rows: &[RawRow],
        mapping: &ResolvedMapping,
        session: &ImportSession,
        settings: RunSettings,
        summary: &mut ImportSummary,
    ) -> ImportResult<()> {
        let options = session.options();
        let mapper = FieldMapper::new(mapping, options);
        let index = self
            .matching
            .index()
            .map_err(|e| ImportError::InternalError(e.to_string()))?;
        let mut seen: HashSet<UsageDuplicateKey> = HashSet::new();

        for row in rows {
            let record = match mapper.map_row(row) {
                Ok(record) => record,
                Err(e) => {
                    summary.record_error(e.to_string(), settings.error_log_limit);
                    continue;
                }
            };
            if options.skip_duplicates {
                let key = record.duplicate_key();
                if seen.contains(&key) || self.usage_repo.exists_duplicate(&key)? {
                    summary.skipped_duplicates += 1;
                    continue;
                }
                seen.insert(key);
            }
            summary.imported += 1;
            if let Some(result) = self.matching.match_with(&index, &record) {
                if self.matching.is_acceptable(&result) {
                    summary.matched += 1;
                }
            }
        }
        Ok(())
    }

    // ==========================================
    // 提交模式: 分批事务落库
    // ==========================================
    async fn commit(
        &self,
        rows: &[RawRow],
        mapping: &ResolvedMapping,
        session: &ImportSession,
        settings: RunSettings,
        summary: &mut ImportSummary,
    ) -> ImportResult<()> {
        let options = session.options();
        let mapper = FieldMapper::new(mapping, options);
        let cancel = session.cancel_handle();
        let mut seen: HashSet<UsageDuplicateKey> = HashSet::new();

        for (batch_no, chunk) in rows.chunks(settings.batch_size).enumerate() {
            if cancel.is_cancelled() {
                warn!(batch_id = %summary.batch_id, batch_no = batch_no, "导入在批次边界被取消");
                summary.aborted = true;
                return Ok(());
            }

            // ===== 行映射（行级错误计数后跳过） =====
            let mut records: Vec<UsageRecord> = Vec::with_capacity(chunk.len());
            for row in chunk {
                match mapper.map_row(row) {
                    Ok(mut record) => {
                        record.import_batch_id = Some(summary.batch_id.clone());
                        records.push(record);
                    }
                    Err(e) => {
                        warn!(row = row.line, error = %e, "行导入失败");
                        summary.record_error(e.to_string(), settings.error_log_limit);
                    }
                }
            }

            // ===== 去重 + 落库（一批一个事务） =====
            let new_ids = {
                let conn = self.usage_repo.get_conn()?;
                let tx = conn.unchecked_transaction()?;
                let mut to_insert = Vec::with_capacity(records.len());
                for record in records {
                    if options.skip_duplicates {
                        let key = record.duplicate_key();
                        if seen.contains(&key) || UsageRepository::exists_duplicate_tx(&tx, &key)? {
                            summary.skipped_duplicates += 1;
                            continue;
                        }
                        seen.insert(key);
                    }
                    to_insert.push(record);
                }
                let ids = UsageRepository::batch_insert_tx(&tx, &to_insert)?;
                tx.commit()?;
                ids
            };
            summary.imported += new_ids.len();
            summary.committed_batches += 1;
            debug!(batch_no = batch_no, inserted = new_ids.len(), "批次已提交");

            // ===== 自动匹配新落库的记录 =====
            if options.auto_match && !new_ids.is_empty() {
                match self.matching.auto_match_ids(&new_ids) {
                    Ok(stats) => summary.matched += stats.matched,
                    Err(e) => warn!(batch_no = batch_no, error = %e, "批次自动匹配失败，记录保持未匹配"),
                }
            }

            self.batch_repo
                .update_progress(&summary.batch_id, ImportSessionState::Importing, summary)?;
            session.report_progress(summary);
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

#[async_trait]
impl<C> UsageImporter for UsageImporterImpl<C>
where
    C: ImportConfigReader,
{
    #[instrument(skip(self, session), fields(file = %session.file().file_name))]
    async fn preview(&self, session: &mut ImportSession) -> ImportResult<FilePreview> {
        session.require(
            &[ImportSessionState::Configuring, ImportSessionState::Previewing],
            "预览",
        )?;
        let rows = self
            .config
            .get_preview_rows()
            .await
            .map_err(|e| ImportError::InternalError(format!("读取预览行数失败: {}", e)))?;

        match self.parser.preview(session.file(), session.format(), rows) {
            Ok(preview) => {
                info!(columns = preview.columns.len(), total_rows = preview.total_rows, "文件预览完成");
                session.enter_previewing(preview.clone());
                Ok(preview)
            }
            Err(e) => {
                warn!(error = %e, "文件预览失败");
                session.finish(None, true);
                Err(e)
            }
        }
    }

    #[instrument(skip(self, session), fields(file = %session.file().file_name, batch_id))]
    async fn run(&self, session: &mut ImportSession) -> ImportResult<ImportSummary> {
        session.require(&[ImportSessionState::Previewing], "导入")?;
        let mapping = session
            .mapping()
            .cloned()
            .ok_or_else(|| ImportError::MappingError("尚未设置列映射".to_string()))?;
        let settings = self.load_settings().await?;

        let started = Instant::now();
        let options = session.options().clone();
        let batch_id = new_batch_id(options.source_type, Utc::now());
        tracing::Span::current().record("batch_id", batch_id.as_str());
        session.enter_importing();

        debug!("步骤 1: 解析文件");
        let table = match self.parser.parse(session.file(), session.format()) {
            Ok(table) => table,
            Err(e) => {
                session.finish(None, true);
                return Err(e);
            }
        };

        let mut summary = ImportSummary {
            batch_id: batch_id.clone(),
            dry_run: options.dry_run,
            total: table.rows.len(),
            ..ImportSummary::default()
        };
        info!(
            batch_id = %batch_id,
            total_rows = summary.total,
            dry_run = options.dry_run,
            "开始导入使用报表"
        );

        let outcome = if options.dry_run {
            debug!("步骤 2: 试运行");
            self.simulate(&table.rows, &mapping, session, settings, &mut summary)
        } else {
            debug!("步骤 2: 写入审计批次");
            let audit = ImportBatch {
                batch_id: batch_id.clone(),
                file_name: session.file().file_name.clone(),
                source_type: options.source_type,
                period_start: options.period_start,
                period_end: options.period_end,
                state: ImportSessionState::Importing,
                total_rows: summary.total as i64,
                imported_rows: 0,
                matched_rows: 0,
                error_rows: 0,
                skipped_rows: 0,
                started_at: Utc::now(),
                finished_at: None,
            };
            match self.batch_repo.insert(&audit) {
                Ok(_) => {
                    debug!("步骤 3: 分批落库");
                    self.commit(&table.rows, &mapping, session, settings, &mut summary)
                        .await
                }
                Err(e) => Err(ImportError::from(e)),
            }
        };
        summary.elapsed_ms = started.elapsed().as_millis() as i64;

        let failed = outcome.is_err() || summary.aborted;
        if !options.dry_run {
            let state = if failed {
                ImportSessionState::Failed
            } else {
                ImportSessionState::Completed
            };
            if let Err(e) = self.batch_repo.update_progress(&batch_id, state, &summary) {
                warn!(batch_id = %batch_id, error = %e, "审计批次状态写入失败");
            }
        }
        session.finish(Some(summary.clone()), failed);

        outcome?;
        if summary.aborted {
            return Err(ImportError::Aborted {
                committed_batches: summary.committed_batches,
            });
        }

        info!(
            batch_id = %batch_id,
            total = summary.total,
            imported = summary.imported,
            matched = summary.matched,
            errors = summary.errors,
            skipped = summary.skipped_duplicates,
            elapsed_ms = summary.elapsed_ms,
            "使用报表导入完成"
        );
        Ok(summary)
    }

    async fn import(&self, request: ImportRequest) -> ImportResult<ImportSummary> {
        let mut session = ImportSession::new(request.file, request.format, request.options)?;
        self.preview(&mut session).await?;
        session.set_mapping(&request.mapping)?;
        self.run(&mut session).await
    }

    async fn import_many(&self, requests: Vec<ImportRequest>) -> Vec<ImportResult<ImportSummary>> {
        info!(count = requests.len(), "开始批量导入文件");
        let futures = requests.into_iter().map(|req| {
            let file_name = req.file.file_name.clone();
            async move {
                let result = self.import(req).await;
                if let Err(e) = &result {
                    warn!(file = %file_name, error = %e, "文件导入失败");
                }
                result
            }
        });
        futures::future::join_all(futures).await
    }
}
