// ==========================================
// 版权结算对账系统 - 配置管理 API
// ==========================================
// 职责: 配置查询、更新、快照
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::config_manager::config_keys;
use crate::config::ConfigManager;
use crate::domain::types::Bucket;
use std::sync::Arc;
use tracing::info;

pub struct ConfigApi {
    config_manager: Arc<ConfigManager>,
}

impl ConfigApi {
    pub fn new(config_manager: Arc<ConfigManager>) -> Self {
        Self { config_manager }
    }

    pub fn get_config(&self, key: &str) -> ApiResult<Option<String>> {
        self.config_manager
            .get_global_config_value(key)
            .map_err(|e| ApiError::DatabaseError(e.to_string()))
    }

    /// 更新配置（写入前按键校验取值）
    pub fn update_config(&self, key: &str, value: &str) -> ApiResult<()> {
        Self::check_value(key, value)?;
        self.config_manager
            .set_global_config_value(key, value.trim())
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
        info!(key = key, value = value, "配置已更新");
        Ok(())
    }

    /// 全部 global 配置快照（JSON）
    pub fn snapshot(&self) -> ApiResult<String> {
        self.config_manager
            .get_config_snapshot()
            .map_err(|e| ApiError::DatabaseError(e.to_string()))
    }

    fn check_value(key: &str, value: &str) -> ApiResult<()> {
        let invalid = |reason: &str| ApiError::InvalidInput(format!("配置 {} 取值无效 ({}): {}", key, reason, value));
        match key {
            config_keys::MATCH_CODE_CONFIDENCE
            | config_keys::MATCH_FUZZY_CONFIDENCE
            | config_keys::MATCH_ACCEPT_THRESHOLD => match value.trim().parse::<f64>() {
                Ok(v) if (0.0..=1.0).contains(&v) => Ok(()),
                _ => Err(invalid("应在 [0,1] 之间")),
            },
            config_keys::IMPORT_BATCH_SIZE
            | config_keys::IMPORT_ERROR_LOG_LIMIT
            | config_keys::IMPORT_PREVIEW_ROWS => match value.trim().parse::<usize>() {
                Ok(v) if v > 0 => Ok(()),
                _ => Err(invalid("应为正整数")),
            },
            config_keys::LEDGER_DEFAULT_BUCKET => Bucket::parse(value)
                .map(|_| ())
                .ok_or_else(|| invalid("未知回收桶")),
            _ => Err(ApiError::InvalidInput(format!("未知配置键: {}", key))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert!(ConfigApi::check_value(config_keys::MATCH_ACCEPT_THRESHOLD, "0.65").is_ok());
        assert!(ConfigApi::check_value(config_keys::MATCH_ACCEPT_THRESHOLD, "1.2").is_err());
        assert!(ConfigApi::check_value(config_keys::IMPORT_BATCH_SIZE, "0").is_err());
        assert!(ConfigApi::check_value(config_keys::LEDGER_DEFAULT_BUCKET, "tour support").is_ok());
        assert!(ConfigApi::check_value("matching.unknown", "1").is_err());
    }
}
