// ==========================================
// ConfigApi 集成测试
// ==========================================
// 测试范围:
// 1. 配置查询 / 更新（按键校验）
// 2. 配置生效: 默认回收桶、错误日志条数
// 3. 配置快照
// ==========================================

use royalty_recon::api::{FileFormatInput, ImportUsageInput, LedgerEntryInput};
use royalty_recon::config::config_keys;
use royalty_recon::domain::types::Bucket;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use test_helpers::create_test_state;

#[test]
fn test_update_config_validates_values() {
    let (_tmp, state) = create_test_state().expect("创建测试环境失败");
    let api = &state.config_api;

    assert_eq!(api.get_config(config_keys::IMPORT_BATCH_SIZE).unwrap(), None);

    api.update_config(config_keys::IMPORT_BATCH_SIZE, " 250 ").unwrap();
    assert_eq!(
        api.get_config(config_keys::IMPORT_BATCH_SIZE).unwrap().as_deref(),
        Some("250")
    );
    assert_eq!(state.config.batch_size().unwrap(), 250);

    let err = api.update_config(config_keys::MATCH_ACCEPT_THRESHOLD, "1.5").unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
    assert!(api.update_config(config_keys::LEDGER_DEFAULT_BUCKET, "merch").is_err());
    assert!(api.update_config("import.unknown", "1").is_err());

    let snapshot: serde_json::Value = serde_json::from_str(&api.snapshot().unwrap()).unwrap();
    assert_eq!(snapshot[config_keys::IMPORT_BATCH_SIZE], "250");
}

#[test]
fn test_default_bucket_applies_to_manual_entries() {
    let (_tmp, state) = create_test_state().expect("创建测试环境失败");
    state
        .config_api
        .update_config(config_keys::LEDGER_DEFAULT_BUCKET, "marketing")
        .unwrap();

    let entry = state
        .ledger_api
        .post_entry(&LedgerEntryInput {
            party_id: 3,
            deal_id: None,
            bucket: None,
            entry_date: "2024-05-01".to_string(),
            description: "Campaign spend".to_string(),
            debit: dec!(120),
            credit: Decimal::ZERO,
        })
        .unwrap();
    assert_eq!(entry.bucket, Bucket::Marketing);
}

#[tokio::test]
async fn test_error_log_limit_caps_messages() {
    let (_tmp, state) = create_test_state().expect("创建测试环境失败");
    state
        .config_api
        .update_config(config_keys::IMPORT_ERROR_LOG_LIMIT, "2")
        .unwrap();

    // 5 行全部缺少艺人
    let csv = "Track,Artist\nA,\nB,\nC,\nD,\nE,\n";
    let input = ImportUsageInput {
        file_name: "bad.csv".to_string(),
        bytes: csv.as_bytes().to_vec(),
        format: FileFormatInput::default(),
        mapping: [("track_name", "Track"), ("artist_name", "Artist")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        source_type: "PRO".to_string(),
        source_reference: None,
        period_start: "2024-01-01".to_string(),
        period_end: "2024-01-31".to_string(),
        currency: None,
        exchange_rate: None,
        default_usage_type: None,
        auto_match: false,
        skip_duplicates: false,
        dry_run: false,
    };
    let response = state.import_api.import_usage(input).await.unwrap();
    assert_eq!(response.summary.errors, 5);
    assert_eq!(response.summary.imported, 0);
    assert_eq!(response.summary.error_log.len(), 2);
}
