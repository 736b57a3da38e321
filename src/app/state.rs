// ==========================================
// 版权结算对账系统 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和 API 实例
// 所有仓储与引擎共享同一个数据库连接
// ==========================================

use std::path::PathBuf;
use std::sync::Arc;

use crate::api::{CatalogApi, ConfigApi, ImportApi, LedgerApi, SettlementApi};
use crate::config::ConfigManager;
use crate::db::open_shared_connection;
use crate::engine::{
    AccountingPoster, CatalogIndex, MatchingEngine, OptionalAccountingPoster, PaymentReconciliation,
    RecoupLedger, StatementAggregator, UsageService,
};
use crate::importer::UsageImporterImpl;
use crate::repository::{
    CatalogRepository, DealRepository, ImportBatchRepository, LedgerRepository, PaymentRepository,
    StatementRepository, UsageRepository,
};

/// 应用状态
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 配置管理器
    pub config: Arc<ConfigManager>,

    /// 核心引擎
    pub matching: Arc<MatchingEngine>,
    pub ledger: Arc<RecoupLedger>,
    pub statements: Arc<StatementAggregator>,
    pub payments: Arc<PaymentReconciliation>,
    pub usage_service: Arc<UsageService>,
    pub importer: Arc<UsageImporterImpl<Arc<ConfigManager>>>,

    /// 协作方 API
    pub catalog_api: Arc<CatalogApi>,
    pub config_api: Arc<ConfigApi>,
    pub import_api: Arc<ImportApi>,
    pub ledger_api: Arc<LedgerApi>,
    pub settlement_api: Arc<SettlementApi>,
}

impl AppState {
    /// 创建新的 AppState 实例（不接入会计系统）
    pub fn new(db_path: String) -> Result<Self, String> {
        Self::with_poster(db_path, OptionalAccountingPoster::none())
    }

    /// 接入会计过账协作方
    pub fn with_accounting_poster(db_path: String, poster: Arc<dyn AccountingPoster>) -> Result<Self, String> {
        Self::with_poster(db_path, OptionalAccountingPoster::with_poster(poster))
    }

    /// # 说明
    /// 1. 打开共享连接并建表
    /// 2. 初始化 Repository 层
    /// 3. 加载曲库索引与匹配参数，初始化 Engine 层
    /// 4. 创建 API 实例
    fn with_poster(db_path: String, poster: OptionalAccountingPoster) -> Result<Self, String> {
        tracing::info!(db_path = %db_path, "初始化 AppState");

        let conn = open_shared_connection(&db_path).map_err(|e| format!("无法打开数据库: {}", e))?;

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let catalog_repo = Arc::new(CatalogRepository::from_connection(conn.clone()));
        let usage_repo = Arc::new(UsageRepository::from_connection(conn.clone()));
        let ledger_repo = Arc::new(LedgerRepository::from_connection(conn.clone()));
        let deal_repo = Arc::new(DealRepository::from_connection(conn.clone()));
        let statement_repo = Arc::new(StatementRepository::from_connection(conn.clone()));
        let payment_repo = Arc::new(PaymentRepository::from_connection(conn.clone()));
        let batch_repo = Arc::new(ImportBatchRepository::from_connection(conn.clone()));
        let config = Arc::new(ConfigManager::from_connection(conn));

        // ==========================================
        // 初始化Engine层
        // ==========================================
        let match_config = config
            .match_config()
            .map_err(|e| format!("匹配参数无效: {}", e))?;
        let index = CatalogIndex::load(&catalog_repo).map_err(|e| format!("无法加载曲库索引: {}", e))?;
        tracing::info!(recordings = index.recording_count(), "曲库索引已加载");

        let matching = Arc::new(MatchingEngine::new(index, usage_repo.clone(), match_config));
        let ledger = Arc::new(RecoupLedger::new(ledger_repo, poster.clone()));
        let statements = Arc::new(StatementAggregator::new(statement_repo.clone()));
        let payments = Arc::new(PaymentReconciliation::new(payment_repo, poster));
        let usage_service = Arc::new(UsageService::new(usage_repo.clone()));
        let importer = Arc::new(UsageImporterImpl::new(
            usage_repo.clone(),
            batch_repo.clone(),
            matching.clone(),
            config.clone(),
        ));

        // ==========================================
        // 创建API实例
        // ==========================================
        let catalog_api = Arc::new(CatalogApi::new(
            catalog_repo,
            usage_repo,
            matching.clone(),
            usage_service.clone(),
        ));
        let config_api = Arc::new(ConfigApi::new(config.clone()));
        let import_api = Arc::new(ImportApi::new(
            importer.clone(),
            usage_service.clone(),
            batch_repo,
            config.clone(),
        ));
        let ledger_api = Arc::new(LedgerApi::new(ledger.clone(), deal_repo, config.clone()));
        let settlement_api = Arc::new(SettlementApi::new(statements.clone(), payments.clone(), statement_repo));

        Ok(Self {
            db_path,
            config,
            matching,
            ledger,
            statements,
            payments,
            usage_service,
            importer,
            catalog_api,
            config_api,
            import_api,
            ledger_api,
            settlement_api,
        })
    }
}

/// 获取默认数据库路径
///
/// 优先级: ROYALTY_RECON_DB_PATH 环境变量 → 用户数据目录 → 当前目录
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var("ROYALTY_RECON_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./royalty_recon.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("royalty-recon");
        // 目录创建失败时退回当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("royalty_recon.db");
        }
    }
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_app_state_wires_on_fresh_db() {
        let tmp = NamedTempFile::new().unwrap();
        let state = AppState::new(tmp.path().to_string_lossy().to_string()).unwrap();
        assert_eq!(state.catalog_api.refresh_index().unwrap(), 0);
        assert_eq!(state.matching.config().accept_threshold, 0.7);
    }
}
