// ==========================================
// 版权结算对账系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、字段级校验
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod catalog;
pub mod deal;
pub mod import;
pub mod ledger;
pub mod money;
pub mod payment;
pub mod statement;
pub mod types;
pub mod usage;

// 重导出核心类型
pub use catalog::{CatalogEntity, Recording, Work};
pub use deal::{AdvancePosting, Deal, EscalationSchedule, RateEscalation};
pub use import::{
    FileFormat, FilePreview, ImportBatch, ImportOptions, ImportSessionState, ImportSummary,
    TextEncoding, UploadedFile, UsageField,
};
pub use ledger::{
    CrossTransfer, LedgerEntry, LedgerEntryPatch, LedgerSource, LedgerStatement, NewLedgerEntry,
    SeriesKey,
};
pub use payment::{Payment, PaymentLine};
pub use statement::{NewStatement, Statement, StatementTotals};
pub use types::{
    Bucket, DealStatus, MatchState, PaymentMethod, PaymentState, SourceType, StatementState,
    UsageType,
};
pub use usage::{MatchStats, UsageDuplicateKey, UsageRecord};
