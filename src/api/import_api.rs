// ==========================================
// 版权结算对账系统 - 使用报表导入 API
// ==========================================
// 职责: 文件上传协作方入口（预览 / 推荐映射 / 导入 / 撤销批次）
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::validator::{parse_date, parse_delimiter, parse_source_type, parse_usage_type};
use crate::config::ConfigManager;
use crate::domain::import::{
    FileFormat, FilePreview, ImportBatch, ImportOptions, ImportSummary, TextEncoding, UploadedFile,
    UsageField,
};
use crate::engine::{RemovalOutcome, UsageService};
use crate::importer::{
    ColumnMapping, ColumnRef, ImportRequest, UniversalFileParser, UsageImporter, UsageImporterImpl,
};
use crate::repository::ImportBatchRepository;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 文件格式声明（字符串形式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFormatInput {
    pub delimiter: String,
    pub encoding: String,
    pub has_header: bool,
}

impl Default for FileFormatInput {
    fn default() -> Self {
        Self {
            delimiter: ",".to_string(),
            encoding: "UTF-8".to_string(),
            has_header: true,
        }
    }
}

/// 导入请求（字符串形式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportUsageInput {
    pub file_name: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub format: FileFormatInput,
    /// 字段名 → 列名（表头文件）或 0 起列号（无表头文件）
    pub mapping: BTreeMap<String, String>,
    pub source_type: String,
    pub source_reference: Option<String>,
    pub period_start: String,
    pub period_end: String,
    pub currency: Option<String>,
    pub exchange_rate: Option<Decimal>,
    pub default_usage_type: Option<String>,
    pub auto_match: bool,
    pub skip_duplicates: bool,
    pub dry_run: bool,
}

/// 导入API响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportApiResponse {
    pub summary: ImportSummary,
    /// 可读的结果说明
    pub message: String,
}

pub struct ImportApi {
    importer: Arc<UsageImporterImpl<Arc<ConfigManager>>>,
    usage_service: Arc<UsageService>,
    batch_repo: Arc<ImportBatchRepository>,
    config: Arc<ConfigManager>,
}

impl ImportApi {
    pub fn new(
        importer: Arc<UsageImporterImpl<Arc<ConfigManager>>>,
        usage_service: Arc<UsageService>,
        batch_repo: Arc<ImportBatchRepository>,
        config: Arc<ConfigManager>,
    ) -> Self {
        Self {
            importer,
            usage_service,
            batch_repo,
            config,
        }
    }

    fn parse_format(input: &FileFormatInput) -> ApiResult<FileFormat> {
        let encoding = TextEncoding::parse(&input.encoding)
            .ok_or_else(|| ApiError::InvalidInput(format!("不支持的编码: {}", input.encoding)))?;
        let format = FileFormat {
            delimiter: parse_delimiter(&input.delimiter)?,
            encoding,
            has_header: input.has_header,
        };
        format.validate().map_err(ApiError::InvalidInput)?;
        Ok(format)
    }

    /// 字符串映射 → ColumnMapping
    pub fn parse_mapping(raw: &BTreeMap<String, String>, has_header: bool) -> ApiResult<ColumnMapping> {
        let mut mapping = ColumnMapping::new();
        for (field, column) in raw {
            let field = UsageField::parse(field)
                .ok_or_else(|| ApiError::InvalidInput(format!("未知字段: {}", field)))?;
            let column = if has_header {
                ColumnRef::Name(column.trim().to_string())
            } else {
                ColumnRef::Index(column.trim().parse::<usize>().map_err(|_| {
                    ApiError::InvalidInput(format!("无表头文件须按列号映射 (字段 {}): {}", field, column))
                })?)
            };
            mapping.set(field, column);
        }
        Ok(mapping)
    }

    /// 预览文件（不落库）
    pub fn preview_file(&self, file_name: &str, bytes: Vec<u8>, format: &FileFormatInput) -> ApiResult<FilePreview> {
        let format = Self::parse_format(format)?;
        let rows = self
            .config
            .preview_rows()
            .map_err(|e| ApiError::InternalError(e.to_string()))?;
        Ok(UniversalFileParser.preview(&UploadedFile::new(file_name, bytes), &format, rows)?)
    }

    /// 根据表头推荐映射（字段名 → 列名）
    pub fn suggest_mapping(&self, columns: &[String]) -> BTreeMap<String, String> {
        let mapping = ColumnMapping::suggest(columns);
        UsageField::ALL
            .iter()
            .filter_map(|f| match mapping.get(*f) {
                Some(ColumnRef::Name(name)) => Some((f.as_str().to_string(), name.clone())),
                Some(ColumnRef::Index(idx)) => Some((f.as_str().to_string(), idx.to_string())),
                None => None,
            })
            .collect()
    }

    fn build_request(input: ImportUsageInput) -> ApiResult<ImportRequest> {
        let format = Self::parse_format(&input.format)?;
        let mapping = Self::parse_mapping(&input.mapping, format.has_header)?;

        let mut options = ImportOptions::new(
            parse_source_type(&input.source_type)?,
            parse_date("period_start", &input.period_start)?,
            parse_date("period_end", &input.period_end)?,
        );
        options.source_reference = input.source_reference;
        if let Some(currency) = input.currency {
            options.currency = currency.trim().to_uppercase();
        }
        if let Some(rate) = input.exchange_rate {
            options.exchange_rate = rate;
        }
        if let Some(usage_type) = input.default_usage_type.as_deref() {
            options.default_usage_type = parse_usage_type(usage_type)?;
        }
        options.auto_match = input.auto_match;
        options.skip_duplicates = input.skip_duplicates;
        options.dry_run = input.dry_run;
        options.validate().map_err(ApiError::InvalidInput)?;

        Ok(ImportRequest {
            file: UploadedFile::new(input.file_name, input.bytes),
            format,
            mapping,
            options,
        })
    }

    /// 导入使用报表
    ///
    /// # 返回
    /// - Ok(ImportApiResponse): 累计统计 + 前 N 条错误
    /// - Err(ApiError): 映射/选项无效或文件级致命错误
    pub async fn import_usage(&self, input: ImportUsageInput) -> ApiResult<ImportApiResponse> {
        let request = Self::build_request(input)?;
        let summary = self.importer.import(request).await?;
        let message = if summary.dry_run {
            format!(
                "试运行: 共 {} 行，可导入 {}，可匹配 {}，错误 {}",
                summary.total, summary.imported, summary.matched, summary.errors
            )
        } else {
            format!(
                "导入完成: 共 {} 行，导入 {}，匹配 {}，错误 {}，跳过重复 {}",
                summary.total, summary.imported, summary.matched, summary.errors, summary.skipped_duplicates
            )
        };
        Ok(ImportApiResponse { summary, message })
    }

    /// 并发导入多个文件
    pub async fn import_many(&self, inputs: Vec<ImportUsageInput>) -> Vec<ApiResult<ImportApiResponse>> {
        let mut requests = Vec::with_capacity(inputs.len());
        let mut slots: Vec<ApiResult<()>> = Vec::with_capacity(inputs.len());
        for input in inputs {
            match Self::build_request(input) {
                Ok(req) => {
                    requests.push(req);
                    slots.push(Ok(()));
                }
                Err(e) => slots.push(Err(e)),
            }
        }

        let mut results = self.importer.import_many(requests).await.into_iter();
        slots
            .into_iter()
            .map(|slot| {
                slot?;
                let summary = results
                    .next()
                    .ok_or_else(|| ApiError::InternalError("导入结果数量不一致".to_string()))??;
                Ok(ImportApiResponse {
                    message: format!("导入完成: 共 {} 行，导入 {}", summary.total, summary.imported),
                    summary,
                })
            })
            .collect()
    }

    pub fn get_batch(&self, batch_id: &str) -> ApiResult<ImportBatch> {
        Ok(self.batch_repo.find_by_id(batch_id)?)
    }

    /// 撤销导入批次
    pub fn undo_batch(&self, batch_id: &str) -> ApiResult<RemovalOutcome> {
        Ok(self.usage_service.undo_batch(batch_id)?)
    }
}
