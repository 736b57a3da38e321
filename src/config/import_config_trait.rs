// ==========================================
// 版权结算对账系统 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入管道所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::engine::matching_engine::MatchConfig;
use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;

/// 配置读取结果
pub type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入管道所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    /// 每批提交行数
    ///
    /// # 默认值
    /// - 1000
    async fn get_batch_size(&self) -> ConfigResult<usize>;

    /// 错误日志保留条数（前 N 条）
    ///
    /// # 默认值
    /// - 10
    async fn get_error_log_limit(&self) -> ConfigResult<usize>;

    /// 预览行数
    ///
    /// # 默认值
    /// - 5
    async fn get_preview_rows(&self) -> ConfigResult<usize>;

    /// 匹配引擎参数（置信度/采纳阈值）
    async fn get_match_config(&self) -> ConfigResult<MatchConfig>;
}

// 共享实例（Arc<ConfigManager>）同样可作为配置读取器
#[async_trait]
impl<T> ImportConfigReader for Arc<T>
where
    T: ImportConfigReader + ?Sized,
{
    async fn get_batch_size(&self) -> ConfigResult<usize> {
        (**self).get_batch_size().await
    }

    async fn get_error_log_limit(&self) -> ConfigResult<usize> {
        (**self).get_error_log_limit().await
    }

    async fn get_preview_rows(&self) -> ConfigResult<usize> {
        (**self).get_preview_rows().await
    }

    async fn get_match_config(&self) -> ConfigResult<MatchConfig> {
        (**self).get_match_config().await
    }
}
