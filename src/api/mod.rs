// ==========================================
// 版权结算对账系统 - API 层
// ==========================================
// 职责: 面向协作方的字符串边界（曲库 / 合约 / 上传 / 报表）
// ==========================================

pub mod catalog_api;
pub mod config_api;
pub mod error;
pub mod import_api;
pub mod ledger_api;
pub mod settlement_api;
pub mod validator;

// 重导出核心类型
pub use catalog_api::CatalogApi;
pub use config_api::ConfigApi;
pub use error::{ApiError, ApiErrorResponse, ApiResult};
pub use import_api::{FileFormatInput, ImportApi, ImportApiResponse, ImportUsageInput};
pub use ledger_api::{BalanceResponse, LedgerApi, LedgerEntryInput, LedgerEntryPatchInput};
pub use settlement_api::{NewStatementInput, SettlementApi};
