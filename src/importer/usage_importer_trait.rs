// ==========================================
// 版权结算对账系统 - 使用报表导入 Trait
// ==========================================
// 职责: 定义导入接口（不包含实现）
// ==========================================

use crate::domain::import::{FileFormat, FilePreview, ImportOptions, ImportSummary, UploadedFile};
use crate::importer::column_mapping::ColumnMapping;
use crate::importer::error::ImportResult;
use crate::importer::session::ImportSession;
use async_trait::async_trait;

/// 一次完整导入所需的全部输入
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub file: UploadedFile,
    pub format: FileFormat,
    pub mapping: ColumnMapping,
    pub options: ImportOptions,
}

// ==========================================
// UsageImporter Trait
// ==========================================
// 用途: 使用报表导入主接口
// 实现者: UsageImporterImpl
#[async_trait]
pub trait UsageImporter: Send + Sync {
    /// 预览会话中的文件（Configuring/Previewing → Previewing）
    ///
    /// # 返回
    /// - Ok(FilePreview): 表头 + 前 N 行 + 总行数
    /// - Err: 编码/格式等致命错误（会话进入 Failed）
    ///
    /// # 说明
    /// - 不触碰持久化存储
    async fn preview(&self, session: &mut ImportSession) -> ImportResult<FilePreview>;

    /// 执行导入（Previewing → Importing → Completed | Failed）
    ///
    /// # 返回
    /// - Ok(ImportSummary): 累计统计（试运行模式下为模拟统计）
    /// - Err(Aborted): 在批次边界被取消，已提交批次保留
    /// - Err: 致命错误
    async fn run(&self, session: &mut ImportSession) -> ImportResult<ImportSummary>;

    /// 一步完成: 建立会话 → 预览 → 设置映射 → 导入
    async fn import(&self, request: ImportRequest) -> ImportResult<ImportSummary>;

    /// 并发导入多个文件（每个文件独立，失败互不影响）
    async fn import_many(&self, requests: Vec<ImportRequest>) -> Vec<ImportResult<ImportSummary>>;
}
