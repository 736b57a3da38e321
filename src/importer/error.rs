// ==========================================
// 版权结算对账系统 - 导入模块错误类型
// ==========================================
// 分类: 致命错误（整个导入中止，未处理任何行）
//       行级错误（计数+记录后跳过，不影响同批其他行）
// 工具: thiserror 派生宏
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误（致命） =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .csv/.tsv/.txt/.xlsx/.xls）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("文件编码无法解码 (声明编码 {encoding}): {message}")]
    EncodingError { encoding: String, message: String },

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("文件无数据行")]
    EmptyFile,

    // ===== 映射配置错误（致命，配置阶段即拒绝） =====
    #[error("列映射无效: {0}")]
    MappingError(String),

    #[error("导入选项无效: {0}")]
    InvalidOptions(String),

    #[error("导入会话状态错误: 当前 {state}，无法执行 {action}")]
    InvalidSessionState { state: String, action: String },

    // ===== 行级错误 =====
    #[error("必填字段为空 (行 {row}, 字段 {field})")]
    RequiredFieldMissing { row: usize, field: String },

    #[error("类型转换失败 (行 {row}, 字段 {field}): {message}")]
    TypeConversionError {
        row: usize,
        field: String,
        message: String,
    },

    #[error("编码格式错误 (行 {row}, 字段 {field}): {value}")]
    InvalidCode {
        row: usize,
        field: String,
        value: String,
    },

    #[error("列缺失 (行 {row}): 映射列 {column} 超出该行字段数")]
    ColumnOutOfRange { row: usize, column: String },

    // ===== 数据库错误 =====
    #[error("数据库写入失败: {0}")]
    DatabaseError(String),

    // ===== 流程控制 =====
    #[error("导入已中止（批次边界）: 已提交 {committed_batches} 批")]
    Aborted { committed_batches: usize },

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ImportError {
    /// 是否为行级错误（计数后跳过，不中止导入）
    pub fn is_row_error(&self) -> bool {
        matches!(
            self,
            ImportError::RequiredFieldMissing { .. }
                | ImportError::TypeConversionError { .. }
                | ImportError::InvalidCode { .. }
                | ImportError::ColumnOutOfRange { .. }
        )
    }

    /// 行级错误对应的行号
    pub fn row(&self) -> Option<usize> {
        match self {
            ImportError::RequiredFieldMissing { row, .. }
            | ImportError::TypeConversionError { row, .. }
            | ImportError::InvalidCode { row, .. }
            | ImportError::ColumnOutOfRange { row, .. } => Some(*row),
            _ => None,
        }
    }
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::DatabaseError(err.to_string())
    }
}

// 实现 From<RepositoryError>
impl From<RepositoryError> for ImportError {
    fn from(err: RepositoryError) -> Self {
        ImportError::DatabaseError(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
