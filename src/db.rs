// ==========================================
// 版权结算对账系统 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键/busy_timeout）
// - 幂等建表（CREATE TABLE IF NOT EXISTS），记录 schema_version
// - 金额列为 TEXT（Decimal 十进制文本），合计在 Rust 侧精确累加
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// 共享连接
pub type SharedConnection = Arc<Mutex<Connection>>;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开连接、建表并包装为共享连接
pub fn open_shared_connection(db_path: &str) -> rusqlite::Result<SharedConnection> {
    let conn = open_sqlite_connection(db_path)?;
    ensure_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 幂等建表
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
          version INTEGER PRIMARY KEY,
          applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- ===== 配置 =====
        CREATE TABLE IF NOT EXISTS config_kv (
          scope_id TEXT NOT NULL DEFAULT 'global',
          key TEXT NOT NULL,
          value TEXT NOT NULL,
          updated_at TEXT NOT NULL DEFAULT (datetime('now')),
          PRIMARY KEY (scope_id, key)
        );

        -- ===== 曲库（外部维护，ID 不复用） =====
        CREATE TABLE IF NOT EXISTS catalog_work (
          work_id INTEGER PRIMARY KEY AUTOINCREMENT,
          title TEXT NOT NULL,
          iswc TEXT UNIQUE
        );

        CREATE TABLE IF NOT EXISTS catalog_recording (
          recording_id INTEGER PRIMARY KEY AUTOINCREMENT,
          title TEXT NOT NULL,
          isrc TEXT UNIQUE,
          work_id INTEGER REFERENCES catalog_work(work_id) ON DELETE SET NULL
        );

        CREATE TABLE IF NOT EXISTS catalog_recording_artist (
          recording_id INTEGER NOT NULL REFERENCES catalog_recording(recording_id) ON DELETE CASCADE,
          position INTEGER NOT NULL,
          artist_name TEXT NOT NULL,
          PRIMARY KEY (recording_id, position)
        );

        -- ===== 合约 =====
        CREATE TABLE IF NOT EXISTS deal (
          deal_id INTEGER PRIMARY KEY AUTOINCREMENT,
          party_id INTEGER NOT NULL,
          name TEXT NOT NULL,
          status TEXT NOT NULL,
          default_bucket TEXT NOT NULL DEFAULT 'RECORDING',
          cross_collateralize INTEGER NOT NULL DEFAULT 0,
          royalty_rate TEXT NOT NULL DEFAULT '15',
          escalations_json TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX IF NOT EXISTS idx_deal_party ON deal(party_id);

        -- ===== 导入批次 =====
        CREATE TABLE IF NOT EXISTS import_batch (
          batch_id TEXT PRIMARY KEY,
          file_name TEXT NOT NULL,
          source_type TEXT NOT NULL,
          period_start TEXT NOT NULL,
          period_end TEXT NOT NULL,
          state TEXT NOT NULL,
          total_rows INTEGER NOT NULL DEFAULT 0,
          imported_rows INTEGER NOT NULL DEFAULT 0,
          matched_rows INTEGER NOT NULL DEFAULT 0,
          error_rows INTEGER NOT NULL DEFAULT 0,
          skipped_rows INTEGER NOT NULL DEFAULT 0,
          started_at TEXT NOT NULL,
          finished_at TEXT
        );

        -- ===== 结算单 =====
        CREATE TABLE IF NOT EXISTS statement (
          statement_id INTEGER PRIMARY KEY AUTOINCREMENT,
          reference TEXT NOT NULL DEFAULT '',
          partner_id INTEGER NOT NULL,
          period_start TEXT NOT NULL,
          period_end TEXT NOT NULL,
          currency TEXT NOT NULL,
          state TEXT NOT NULL DEFAULT 'DRAFT',
          statement_date TEXT NOT NULL,
          due_date TEXT NOT NULL,
          sent_date TEXT,
          approved_date TEXT,
          paid_date TEXT,
          manual_adjustment TEXT NOT NULL DEFAULT '0',
          gross_total TEXT NOT NULL DEFAULT '0',
          fee_total TEXT NOT NULL DEFAULT '0',
          net_total TEXT NOT NULL DEFAULT '0',
          recouped_amount TEXT NOT NULL DEFAULT '0',
          payable TEXT NOT NULL DEFAULT '0',
          paid_amount TEXT NOT NULL DEFAULT '0',
          balance_due TEXT NOT NULL DEFAULT '0',
          usage_line_count INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          CHECK (period_start <= period_end)
        );
        CREATE INDEX IF NOT EXISTS idx_statement_partner_period
          ON statement(partner_id, period_start, period_end);

        -- ===== 使用明细 =====
        CREATE TABLE IF NOT EXISTS usage_record (
          usage_id INTEGER PRIMARY KEY AUTOINCREMENT,
          source_type TEXT NOT NULL,
          source_reference TEXT,
          import_batch_id TEXT,
          period_start TEXT NOT NULL,
          period_end TEXT NOT NULL,
          territory_code TEXT,
          service_name TEXT,
          track_name TEXT NOT NULL,
          artist_name TEXT NOT NULL,
          album_name TEXT,
          isrc TEXT,
          iswc TEXT,
          upc TEXT,
          usage_type TEXT NOT NULL,
          units INTEGER NOT NULL DEFAULT 0,
          gross_amount TEXT NOT NULL DEFAULT '0',
          fees TEXT NOT NULL DEFAULT '0',
          currency TEXT NOT NULL,
          exchange_rate TEXT NOT NULL DEFAULT '1',
          match_state TEXT NOT NULL DEFAULT 'UNMATCHED',
          confidence REAL NOT NULL DEFAULT 0,
          recording_id INTEGER REFERENCES catalog_recording(recording_id) ON DELETE SET NULL,
          work_id INTEGER REFERENCES catalog_work(work_id) ON DELETE SET NULL,
          statement_id INTEGER REFERENCES statement(statement_id) ON DELETE SET NULL,
          processed INTEGER NOT NULL DEFAULT 0,
          active INTEGER NOT NULL DEFAULT 1,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          CHECK (period_start <= period_end),
          CHECK (confidence >= 0 AND confidence <= 1)
        );
        CREATE INDEX IF NOT EXISTS idx_usage_duplicate_key
          ON usage_record(source_type, period_start, period_end, track_name, artist_name, isrc);
        CREATE INDEX IF NOT EXISTS idx_usage_statement ON usage_record(statement_id);
        CREATE INDEX IF NOT EXISTS idx_usage_match ON usage_record(match_state, processed, active);
        CREATE INDEX IF NOT EXISTS idx_usage_batch ON usage_record(import_batch_id);

        -- ===== 回收台账 =====
        CREATE TABLE IF NOT EXISTS ledger_entry (
          entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
          party_id INTEGER NOT NULL,
          deal_id INTEGER REFERENCES deal(deal_id),
          bucket TEXT NOT NULL,
          entry_date TEXT NOT NULL,
          description TEXT NOT NULL,
          debit TEXT NOT NULL DEFAULT '0',
          credit TEXT NOT NULL DEFAULT '0',
          balance TEXT NOT NULL DEFAULT '0',
          source_kind TEXT NOT NULL DEFAULT 'NONE',
          source_id INTEGER,
          transfer_id TEXT,
          created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_ledger_series
          ON ledger_entry(party_id, bucket, entry_date, entry_id);
        CREATE INDEX IF NOT EXISTS idx_ledger_source ON ledger_entry(source_kind, source_id);
        CREATE INDEX IF NOT EXISTS idx_ledger_transfer ON ledger_entry(transfer_id);

        -- ===== 付款 =====
        CREATE TABLE IF NOT EXISTS payment (
          payment_id INTEGER PRIMARY KEY AUTOINCREMENT,
          partner_id INTEGER,
          payment_date TEXT NOT NULL,
          method TEXT NOT NULL,
          state TEXT NOT NULL DEFAULT 'DRAFT',
          memo TEXT,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS payment_line (
          line_id INTEGER PRIMARY KEY AUTOINCREMENT,
          payment_id INTEGER NOT NULL REFERENCES payment(payment_id) ON DELETE CASCADE,
          statement_id INTEGER NOT NULL REFERENCES statement(statement_id),
          amount TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payment_line_statement ON payment_line(statement_id);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_schema_version_absent_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }
}
