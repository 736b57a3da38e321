// ==========================================
// 版权结算对账系统 - API层错误类型
// ==========================================
// 职责: 将 AppError 转换为面向协作方的错误（带稳定错误码）
// 红线: 所有错误信息必须包含显式原因
// ==========================================

use crate::error::AppError;
use crate::repository::error::RepositoryError;
use serde::Serialize;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 输入与业务规则
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    // ==========================================
    // 导入
    // ==========================================
    #[error("导入行错误: {0}")]
    ImportRowError(String),

    #[error("文件导入失败: {0}")]
    ImportError(String),

    // ==========================================
    // 数据与一致性
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据一致性错误: {0}")]
    ConsistencyError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 稳定错误码（供协作方分支处理）
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "VALIDATION",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BusinessRuleViolation(_) => "PRECONDITION",
            ApiError::ImportRowError(_) => "IMPORT_ROW",
            ApiError::ImportError(_) => "IMPORT_FATAL",
            ApiError::DatabaseError(_) => "DATABASE",
            ApiError::ConsistencyError(_) => "CONSISTENCY",
            ApiError::InternalError(_) | ApiError::Other(_) => "INTERNAL",
        }
    }

    /// 序列化为错误响应体
    pub fn to_response(&self) -> ApiErrorResponse {
        ApiErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// 错误响应体
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
}

// ==========================================
// 从 AppError 转换
// ==========================================
impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Validation(msg) => ApiError::InvalidInput(msg),
            AppError::Precondition(msg) => ApiError::BusinessRuleViolation(msg),
            AppError::ImportRow { row, message } => {
                ApiError::ImportRowError(format!("行 {}: {}", row, message))
            }
            AppError::ImportFatal(msg) => ApiError::ImportError(msg),
            AppError::Consistency(msg) => ApiError::ConsistencyError(msg),
            AppError::NotFound { entity, id } => ApiError::NotFound(format!("{}(id={})不存在", entity, id)),
            AppError::Database(msg) => ApiError::DatabaseError(msg),
            AppError::Internal(msg) => ApiError::InternalError(msg),
            AppError::Other(e) => ApiError::Other(e),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        ApiError::from(AppError::from(err))
    }
}

impl From<crate::importer::ImportError> for ApiError {
    fn from(err: crate::importer::ImportError) -> Self {
        ApiError::from(AppError::from(err))
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_maps_to_business_rule() {
        let err: ApiError = AppError::precondition("使用明细已锁定").into();
        assert_eq!(err.code(), "PRECONDITION");
        assert!(err.to_string().contains("已锁定"));
    }

    #[test]
    fn test_not_found_message_names_entity() {
        let err: ApiError = RepositoryError::not_found("Statement", 42).into();
        let resp = err.to_response();
        assert_eq!(resp.code, "NOT_FOUND");
        assert!(resp.message.contains("Statement(id=42)"));
    }
}
