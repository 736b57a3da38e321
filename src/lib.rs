// ==========================================
// 版权结算对账系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 使用报表导入匹配 / 回收台账 / 结算单与付款对账
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 导入层 - 外部使用报表
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 统一错误类型
pub mod error;

// 日志系统
pub mod logging;

// API 层 - 协作方接口
pub mod api;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    Bucket, DealStatus, MatchState, PaymentMethod, PaymentState, SourceType, StatementState,
    UsageType,
};

// 领域实体
pub use domain::{
    CatalogEntity, Deal, LedgerEntry, Payment, PaymentLine, Recording, Statement, UsageRecord, Work,
};

// 引擎
pub use engine::{
    MatchingEngine, PaymentReconciliation, RecoupLedger, StatementAggregator, UsageService,
};

// API
pub use api::{CatalogApi, ConfigApi, ImportApi, LedgerApi, SettlementApi};

// 错误
pub use error::{AppError, AppResult};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "版权结算对账系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
