// ==========================================
// 版权结算对账系统 - 导入会话
// ==========================================
// 状态机: CONFIGURING → PREVIEWING → IMPORTING → COMPLETED | FAILED
// 取消: 只在批次边界生效，进行中的批次不会被打断
// 进度: 每提交一批推送一次累计汇总
// ==========================================

use crate::domain::import::{
    FileFormat, FilePreview, ImportOptions, ImportSessionState, ImportSummary, UploadedFile,
};
use crate::importer::column_mapping::{ColumnMapping, ResolvedMapping};
use crate::importer::error::{ImportError, ImportResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// 取消句柄（可跨任务克隆）
#[derive(Debug, Clone, Default)]
pub struct ImportCancelHandle(Arc<AtomicBool>);

impl ImportCancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ImportSession {
    file: UploadedFile,
    format: FileFormat,
    options: ImportOptions,
    state: ImportSessionState,
    preview: Option<FilePreview>,
    mapping: Option<ResolvedMapping>,
    summary: Option<ImportSummary>,
    cancel: ImportCancelHandle,
    progress: Option<mpsc::UnboundedSender<ImportSummary>>,
}

impl ImportSession {
    /// 创建会话（格式与选项在此校验）
    pub fn new(file: UploadedFile, format: FileFormat, options: ImportOptions) -> ImportResult<Self> {
        format.validate().map_err(ImportError::InvalidOptions)?;
        options.validate().map_err(ImportError::InvalidOptions)?;
        Ok(Self {
            file,
            format,
            options,
            state: ImportSessionState::Configuring,
            preview: None,
            mapping: None,
            summary: None,
            cancel: ImportCancelHandle::default(),
            progress: None,
        })
    }

    pub fn state(&self) -> ImportSessionState {
        self.state
    }

    pub fn file(&self) -> &UploadedFile {
        &self.file
    }

    pub fn format(&self) -> &FileFormat {
        &self.format
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    pub fn preview(&self) -> Option<&FilePreview> {
        self.preview.as_ref()
    }

    pub fn mapping(&self) -> Option<&ResolvedMapping> {
        self.mapping.as_ref()
    }

    /// 最近一次运行的汇总（取消时也保留已提交批次的计数）
    pub fn summary(&self) -> Option<&ImportSummary> {
        self.summary.as_ref()
    }

    pub fn cancel_handle(&self) -> ImportCancelHandle {
        self.cancel.clone()
    }

    /// 订阅批次进度（重复订阅时旧接收端不再收到）
    pub fn subscribe_progress(&mut self) -> mpsc::UnboundedReceiver<ImportSummary> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.progress = Some(tx);
        rx
    }

    /// 设置列映射（仅 PREVIEWING，按预览表头校验）
    pub fn set_mapping(&mut self, mapping: &ColumnMapping) -> ImportResult<()> {
        self.require(&[ImportSessionState::Previewing], "设置列映射")?;
        let columns = self
            .preview
            .as_ref()
            .map(|p| p.columns.as_slice())
            .unwrap_or_default();
        self.mapping = Some(mapping.validate_against(columns, self.format.has_header)?);
        Ok(())
    }

    // ===== 状态切换（由导入器驱动） =====

    pub(crate) fn require(&self, allowed: &[ImportSessionState], action: &str) -> ImportResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ImportError::InvalidSessionState {
                state: self.state.to_string(),
                action: action.to_string(),
            })
        }
    }

    pub(crate) fn enter_previewing(&mut self, preview: FilePreview) {
        self.preview = Some(preview);
        self.mapping = None;
        self.state = ImportSessionState::Previewing;
    }

    pub(crate) fn enter_importing(&mut self) {
        self.state = ImportSessionState::Importing;
    }

    /// 接收端已关闭时忽略
    pub(crate) fn report_progress(&self, summary: &ImportSummary) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(summary.clone());
        }
    }

    pub(crate) fn finish(&mut self, summary: Option<ImportSummary>, failed: bool) {
        self.summary = summary;
        self.state = if failed {
            ImportSessionState::Failed
        } else {
            ImportSessionState::Completed
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::import::UsageField;
    use crate::domain::types::SourceType;
    use crate::importer::column_mapping::ColumnRef;
    use chrono::NaiveDate;

    fn session() -> ImportSession {
        ImportSession::new(
            UploadedFile::new("r.csv", b"Track,Artist\nA,B\n".to_vec()),
            FileFormat::default(),
            ImportOptions::new(
                SourceType::Distributor,
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            ),
        )
        .unwrap()
    }

    #[test]
    fn test_mapping_requires_preview() {
        let mut s = session();
        let mapping = ColumnMapping::new()
            .with(UsageField::TrackName, ColumnRef::Name("Track".into()))
            .with(UsageField::ArtistName, ColumnRef::Name("Artist".into()));
        assert!(matches!(
            s.set_mapping(&mapping),
            Err(ImportError::InvalidSessionState { .. })
        ));

        s.enter_previewing(FilePreview {
            columns: vec!["Track".into(), "Artist".into()],
            sample_rows: vec![],
            total_rows: 1,
        });
        s.set_mapping(&mapping).unwrap();
        assert!(s.mapping().is_some());
    }

    #[test]
    fn test_invalid_period_rejected_at_configuration() {
        let mut opts = session().options().clone();
        opts.period_end = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        let err = ImportSession::new(UploadedFile::new("r.csv", vec![]), FileFormat::default(), opts).unwrap_err();
        assert!(matches!(err, ImportError::InvalidOptions(_)));
    }

    #[test]
    fn test_cancel_handle_is_shared() {
        let s = session();
        let handle = s.cancel_handle();
        handle.cancel();
        assert!(s.cancel_handle().is_cancelled());
    }

    #[test]
    fn test_progress_reaches_latest_subscriber() {
        let mut s = session();
        let mut stale = s.subscribe_progress();
        let mut rx = s.subscribe_progress();
        let summary = ImportSummary {
            committed_batches: 1,
            ..ImportSummary::default()
        };
        s.report_progress(&summary);
        assert_eq!(rx.try_recv().unwrap().committed_batches, 1);
        assert!(stale.try_recv().is_err());
    }
}
