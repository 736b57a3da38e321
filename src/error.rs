// ==========================================
// 版权结算对账系统 - 统一错误类型
// ==========================================
// 分类:
// - Validation   : 用户可修正的输入缺陷，任何写入之前抛出
// - Precondition : 对锁定/终态实体执行操作
// - ImportRow    : 单行导入失败（计数后跳过）
// - ImportFatal  : 文件不可读/格式不支持，导入整体中止
// - Consistency  : 不变量被破坏（程序缺陷，不应暴露给用户）
// ==========================================

use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 应用层统一错误
#[derive(Error, Debug)]
pub enum AppError {
    #[error("输入校验失败: {0}")]
    Validation(String),

    #[error("前置条件不满足: {0}")]
    Precondition(String),

    #[error("导入行错误 (行 {row}): {message}")]
    ImportRow { row: usize, message: String },

    #[error("导入失败: {0}")]
    ImportFatal(String),

    #[error("一致性错误: {0}")]
    Consistency(String),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        AppError::Precondition(msg.into())
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        AppError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => AppError::NotFound { entity, id },
            RepositoryError::ValidationError(msg) => AppError::Validation(msg),
            RepositoryError::FieldValueError { field, message } => {
                AppError::Validation(format!("{}: {}", field, message))
            }
            RepositoryError::InternalError(msg) => AppError::Internal(msg),
            RepositoryError::Other(e) => AppError::Other(e),
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::from(RepositoryError::from(err))
    }
}

impl From<ImportError> for AppError {
    fn from(err: ImportError) -> Self {
        if let Some(row) = err.row() {
            return AppError::ImportRow {
                row,
                message: err.to_string(),
            };
        }
        match err {
            ImportError::MappingError(msg) | ImportError::InvalidOptions(msg) => {
                AppError::Validation(msg)
            }
            ImportError::InvalidSessionState { .. } | ImportError::Aborted { .. } => {
                AppError::Precondition(err.to_string())
            }
            ImportError::DatabaseError(msg) => AppError::Database(msg),
            ImportError::InternalError(msg) => AppError::Internal(msg),
            ImportError::Other(e) => AppError::Other(e),
            other => AppError::ImportFatal(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_not_found_maps_to_not_found() {
        let err: AppError = RepositoryError::not_found("Statement", 7).into();
        assert!(matches!(err, AppError::NotFound { ref id, .. } if id == "7"));
    }

    #[test]
    fn test_import_errors_split_row_and_fatal() {
        let row: AppError = ImportError::TypeConversionError {
            row: 3,
            field: "units".to_string(),
            message: "abc".to_string(),
        }
        .into();
        assert!(matches!(row, AppError::ImportRow { row: 3, .. }));

        let fatal: AppError = ImportError::UnsupportedFormat("pdf".to_string()).into();
        assert!(matches!(fatal, AppError::ImportFatal(_)));

        let mapping: AppError = ImportError::MappingError("track 未映射".to_string()).into();
        assert!(matches!(mapping, AppError::Validation(_)));
    }
}
