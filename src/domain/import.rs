// ==========================================
// 版权结算对账系统 - 导入领域对象
// ==========================================
// 职责: 导入选项、文件格式声明、预览、导入汇总、批次审计记录
// ==========================================

use crate::domain::types::{SourceType, UsageType};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 文件编码 (声明值，由上传方提供)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextEncoding {
    Utf8,
    Latin1,
    Windows1252,
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Latin1 => "LATIN-1",
            TextEncoding::Windows1252 => "WINDOWS-1252",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Some(TextEncoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Some(TextEncoding::Latin1),
            "cp1252" | "windows-1252" => Some(TextEncoding::Windows1252),
            _ => None,
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 文件格式声明
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFormat {
    pub delimiter: u8, // `,` `;` `\t` `|`
    pub encoding: TextEncoding,
    pub has_header: bool,
}

impl Default for FileFormat {
    fn default() -> Self {
        Self {
            delimiter: b',',
            encoding: TextEncoding::Utf8,
            has_header: true,
        }
    }
}

impl FileFormat {
    pub const SUPPORTED_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

    pub fn validate(&self) -> Result<(), String> {
        if !Self::SUPPORTED_DELIMITERS.contains(&self.delimiter) {
            return Err(format!("不支持的分隔符: {:?}", self.delimiter as char));
        }
        Ok(())
    }
}

// ==========================================
// 上传文件（原始字节）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// 小写扩展名
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }
}

// ==========================================
// 使用明细字段（列映射目标）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageField {
    TrackName,
    ArtistName,
    AlbumName,
    Isrc,
    Iswc,
    Upc,
    UsageType,
    ServiceName,
    TerritoryCode,
    Units,
    GrossAmount,
    Fees,
}

impl UsageField {
    pub const ALL: [UsageField; 12] = [
        UsageField::TrackName,
        UsageField::ArtistName,
        UsageField::AlbumName,
        UsageField::Isrc,
        UsageField::Iswc,
        UsageField::Upc,
        UsageField::UsageType,
        UsageField::ServiceName,
        UsageField::TerritoryCode,
        UsageField::Units,
        UsageField::GrossAmount,
        UsageField::Fees,
    ];

    pub const REQUIRED: [UsageField; 2] = [UsageField::TrackName, UsageField::ArtistName];

    pub fn as_str(&self) -> &'static str {
        match self {
            UsageField::TrackName => "track_name",
            UsageField::ArtistName => "artist_name",
            UsageField::AlbumName => "album_name",
            UsageField::Isrc => "isrc",
            UsageField::Iswc => "iswc",
            UsageField::Upc => "upc",
            UsageField::UsageType => "usage_type",
            UsageField::ServiceName => "service_name",
            UsageField::TerritoryCode => "territory_code",
            UsageField::Units => "units",
            UsageField::GrossAmount => "gross_amount",
            UsageField::Fees => "fees",
        }
    }

    pub fn is_required(&self) -> bool {
        Self::REQUIRED.contains(self)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_lowercase();
        Self::ALL.iter().copied().find(|f| f.as_str() == key)
    }
}

impl fmt::Display for UsageField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 导入选项
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOptions {
    pub source_type: SourceType,
    pub source_reference: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub currency: String,
    pub exchange_rate: Decimal,
    pub default_usage_type: UsageType,
    pub auto_match: bool,
    pub skip_duplicates: bool,
    pub dry_run: bool,
}

impl ImportOptions {
    pub fn new(source_type: SourceType, period_start: NaiveDate, period_end: NaiveDate) -> Self {
        Self {
            source_type,
            source_reference: None,
            period_start,
            period_end,
            currency: "USD".to_string(),
            exchange_rate: Decimal::ONE,
            default_usage_type: UsageType::Stream,
            auto_match: true,
            skip_duplicates: true,
            dry_run: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.period_end < self.period_start {
            return Err(format!(
                "报告期结束日 {} 早于开始日 {}",
                self.period_end, self.period_start
            ));
        }
        if self.exchange_rate <= Decimal::ZERO {
            return Err(format!("汇率必须大于 0: {}", self.exchange_rate));
        }
        if self.currency.trim().len() != 3 {
            return Err(format!("币种代码无效: {}", self.currency));
        }
        Ok(())
    }
}

// ==========================================
// 文件预览
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePreview {
    pub columns: Vec<String>, // 表头；无表头时为 "Column N"
    pub sample_rows: Vec<Vec<String>>,
    pub total_rows: usize,
}

// ==========================================
// 导入会话状态
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportSessionState {
    Configuring,
    Previewing,
    Importing,
    Completed,
    Failed,
}

impl ImportSessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportSessionState::Configuring => "CONFIGURING",
            ImportSessionState::Previewing => "PREVIEWING",
            ImportSessionState::Importing => "IMPORTING",
            ImportSessionState::Completed => "COMPLETED",
            ImportSessionState::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "CONFIGURING" => Some(ImportSessionState::Configuring),
            "PREVIEWING" => Some(ImportSessionState::Previewing),
            "IMPORTING" => Some(ImportSessionState::Importing),
            "COMPLETED" => Some(ImportSessionState::Completed),
            "FAILED" => Some(ImportSessionState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ImportSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 导入汇总
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub batch_id: String,
    pub dry_run: bool,
    pub total: usize,
    pub imported: usize,     // 提交模式: 已落库；试运行: 可导入
    pub matched: usize,      // 提交模式: 已匹配；试运行: 置信度超过阈值
    pub errors: usize,
    pub skipped_duplicates: usize,
    pub committed_batches: usize,
    pub error_log: Vec<String>, // 前 N 条错误信息
    pub aborted: bool,
    pub elapsed_ms: i64,
}

impl ImportSummary {
    /// 记录一条行级错误（日志只保留前 limit 条）
    pub fn record_error(&mut self, message: String, limit: usize) {
        self.errors += 1;
        if self.error_log.len() < limit {
            self.error_log.push(message);
        }
    }
}

// ==========================================
// 导入批次审计记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub batch_id: String,
    pub file_name: String,
    pub source_type: SourceType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub state: ImportSessionState,
    pub total_rows: i64,
    pub imported_rows: i64,
    pub matched_rows: i64,
    pub error_rows: i64,
    pub skipped_rows: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// 批次 ID: {来源类型}_{YYYYMMDD_HHMMSS}_{短 uuid}
pub fn new_batch_id(source_type: SourceType, now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        source_type.as_str().to_lowercase(),
        now.format("%Y%m%d_%H%M%S"),
        &suffix[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_log_is_bounded() {
        let mut summary = ImportSummary::default();
        for i in 0..15 {
            summary.record_error(format!("Row {}: bad", i), 10);
        }
        assert_eq!(summary.errors, 15);
        assert_eq!(summary.error_log.len(), 10);
        assert_eq!(summary.error_log[0], "Row 0: bad");
    }

    #[test]
    fn test_encoding_parse() {
        assert_eq!(TextEncoding::parse("UTF-8"), Some(TextEncoding::Utf8));
        assert_eq!(TextEncoding::parse("latin_1"), Some(TextEncoding::Latin1));
        assert_eq!(TextEncoding::parse("cp1252"), Some(TextEncoding::Windows1252));
        assert_eq!(TextEncoding::parse("utf-16"), None);
    }

    #[test]
    fn test_file_format_rejects_unknown_delimiter() {
        let fmt = FileFormat { delimiter: b':', ..FileFormat::default() };
        assert!(fmt.validate().is_err());
        assert!(FileFormat::default().validate().is_ok());
    }

    #[test]
    fn test_batch_id_shape() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T08:09:10Z").unwrap().with_timezone(&Utc);
        let id = new_batch_id(SourceType::Distributor, now);
        assert!(id.starts_with("distributor_20240501_080910_"));
        assert_eq!(id.len(), "distributor_20240501_080910_".len() + 8);
    }

    #[test]
    fn test_uploaded_file_extension() {
        assert_eq!(UploadedFile::new("Report.CSV", vec![]).extension().as_deref(), Some("csv"));
        assert_eq!(UploadedFile::new("noext", vec![]).extension(), None);
    }
}
