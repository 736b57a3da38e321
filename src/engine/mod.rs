// ==========================================
// 版权结算对账系统 - 引擎层
// ==========================================
// 职责: 匹配 / 台账 / 结算单 / 付款等业务规则
// 红线: Engine 不拼 SQL，数据访问全部经由 Repository
// ==========================================

pub mod catalog_index;
pub mod events;
pub mod matching_engine;
pub mod payment_reconciliation;
pub mod recalc;
pub mod recoup_ledger;
pub mod statement_aggregator;
pub mod text_normalizer;
pub mod usage_service;

// 重导出核心引擎
pub use catalog_index::{Candidate, CatalogIndex};
pub use events::{AccountingEvent, AccountingPoster, NoOpAccountingPoster, OptionalAccountingPoster};
pub use matching_engine::{MatchConfig, MatchMethod, MatchResult, MatchingEngine};
pub use payment_reconciliation::PaymentReconciliation;
pub use recoup_ledger::RecoupLedger;
pub use statement_aggregator::{compute_totals, StatementAggregator};
pub use usage_service::{RemovalOutcome, UsageService};
