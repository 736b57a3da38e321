// ==========================================
// 版权结算对账系统 - 应用层
// ==========================================
// 职责: 组装仓储 / 引擎 / API，提供默认数据库路径
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
