// ==========================================
// 版权结算对账系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config_trait::{ConfigResult, ImportConfigReader};
use crate::db::{open_shared_connection, SharedConnection};
use crate::domain::types::Bucket;
use crate::engine::matching_engine::MatchConfig;
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;

/// 配置键
pub mod config_keys {
    pub const MATCH_CODE_CONFIDENCE: &str = "matching.code_confidence";
    pub const MATCH_FUZZY_CONFIDENCE: &str = "matching.fuzzy_confidence";
    pub const MATCH_ACCEPT_THRESHOLD: &str = "matching.accept_threshold";
    pub const IMPORT_BATCH_SIZE: &str = "import.batch_size";
    pub const IMPORT_ERROR_LOG_LIMIT: &str = "import.error_log_limit";
    pub const IMPORT_PREVIEW_ROWS: &str = "import.preview_rows";
    pub const LEDGER_DEFAULT_BUCKET: &str = "ledger.default_bucket";
}

/// 默认值
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_ERROR_LOG_LIMIT: usize = 10;
pub const DEFAULT_PREVIEW_ROWS: usize = 5;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: SharedConnection,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_shared_connection(db_path)?;
        Ok(Self { conn })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global 配置（存在则覆盖）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析配置值；缺失或格式错误时使用默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr + Copy,
    {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    warn!(key = key, value = %raw, "配置值格式错误，使用默认值");
                    Ok(default)
                }
            },
        }
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 导入批次审计时记录当时生效的配置
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let mut stmt = conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }
        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 匹配引擎参数（同步版本）
    pub fn match_config(&self) -> ConfigResult<MatchConfig> {
        let defaults = MatchConfig::default();
        let config = MatchConfig {
            code_confidence: self.get_parsed_or_default(config_keys::MATCH_CODE_CONFIDENCE, defaults.code_confidence)?,
            fuzzy_confidence: self.get_parsed_or_default(config_keys::MATCH_FUZZY_CONFIDENCE, defaults.fuzzy_confidence)?,
            accept_threshold: self.get_parsed_or_default(config_keys::MATCH_ACCEPT_THRESHOLD, defaults.accept_threshold)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// 每批提交行数（至少 1）
    pub fn batch_size(&self) -> ConfigResult<usize> {
        let size = self.get_parsed_or_default(config_keys::IMPORT_BATCH_SIZE, DEFAULT_BATCH_SIZE)?;
        Ok(size.max(1))
    }

    pub fn error_log_limit(&self) -> ConfigResult<usize> {
        self.get_parsed_or_default(config_keys::IMPORT_ERROR_LOG_LIMIT, DEFAULT_ERROR_LOG_LIMIT)
    }

    pub fn preview_rows(&self) -> ConfigResult<usize> {
        self.get_parsed_or_default(config_keys::IMPORT_PREVIEW_ROWS, DEFAULT_PREVIEW_ROWS)
    }

    /// 台账默认回收桶
    pub fn default_bucket(&self) -> ConfigResult<Bucket> {
        let raw = self.get_global_config_value(config_keys::LEDGER_DEFAULT_BUCKET)?;
        Ok(raw.as_deref().and_then(Bucket::parse).unwrap_or_default())
    }
}

#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_batch_size(&self) -> ConfigResult<usize> {
        self.batch_size()
    }

    async fn get_error_log_limit(&self) -> ConfigResult<usize> {
        self.error_log_limit()
    }

    async fn get_preview_rows(&self) -> ConfigResult<usize> {
        self.preview_rows()
    }

    async fn get_match_config(&self) -> ConfigResult<MatchConfig> {
        self.match_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn)))
    }

    #[tokio::test]
    async fn test_defaults_when_unset() {
        let cfg = manager();
        assert_eq!(cfg.get_batch_size().await.unwrap(), 1000);
        assert_eq!(cfg.get_error_log_limit().await.unwrap(), 10);
        assert_eq!(cfg.get_preview_rows().await.unwrap(), 5);
        assert_eq!(cfg.get_match_config().await.unwrap(), MatchConfig::default());
        assert_eq!(cfg.default_bucket().unwrap(), Bucket::Recording);
    }

    #[tokio::test]
    async fn test_overrides_and_bad_values() {
        let cfg = manager();
        cfg.set_global_config_value(config_keys::IMPORT_BATCH_SIZE, "250").unwrap();
        cfg.set_global_config_value(config_keys::IMPORT_ERROR_LOG_LIMIT, "lots").unwrap();
        cfg.set_global_config_value(config_keys::LEDGER_DEFAULT_BUCKET, "video").unwrap();
        assert_eq!(cfg.get_batch_size().await.unwrap(), 250);
        assert_eq!(cfg.get_error_log_limit().await.unwrap(), 10);
        assert_eq!(cfg.default_bucket().unwrap(), Bucket::Video);

        let snapshot: serde_json::Value = serde_json::from_str(&cfg.get_config_snapshot().unwrap()).unwrap();
        assert_eq!(snapshot["import.batch_size"], "250");
    }

    #[test]
    fn test_out_of_range_threshold_is_rejected() {
        let cfg = manager();
        cfg.set_global_config_value(config_keys::MATCH_ACCEPT_THRESHOLD, "1.5").unwrap();
        assert!(cfg.match_config().is_err());
    }
}
