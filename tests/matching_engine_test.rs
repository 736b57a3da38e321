// ==========================================
// 匹配引擎集成测试
// ==========================================

use royalty_recon::domain::types::MatchState;
use royalty_recon::engine::MatchMethod;
use royalty_recon::error::AppError;
use rust_decimal_macros::dec;

use test_helpers::{create_test_state, insert_usage, usage_repo};

#[test]
fn test_isrc_beats_fuzzy_candidate() {
    let (_tmp, state) = create_test_state().expect("创建测试环境失败");
    let catalog = &state.catalog_api;

    // 标题/艺人与报告完全一致，但 ISRC 指向另一条录音
    let lookalike = catalog
        .add_recording("Midnight Drive", None, None, &["The Lanterns"])
        .unwrap();
    let by_code = catalog
        .add_recording("Midnight Drive (Remastered)", Some("US-RC1-76-07839"), None, &["The Lanterns"])
        .unwrap();

    let usage_id = insert_usage(&state, "Midnight Drive", "The Lanterns", Some("usrc17607839"), dec!(10.0), dec!(1.0));
    let result = catalog.auto_match(usage_id).unwrap().expect("应匹配");
    assert_eq!(result.recording_id, Some(by_code));
    assert_ne!(result.recording_id, Some(lookalike));
    assert_eq!(result.method, MatchMethod::Code);
    assert_eq!(result.confidence, 1.0);

    let record = catalog.get_usage(usage_id).unwrap();
    assert_eq!(record.match_state, MatchState::AutoMatched);
    assert_eq!(record.recording_id, Some(by_code));
}

#[test]
fn test_fuzzy_requires_single_candidate() {
    let (_tmp, state) = create_test_state().expect("创建测试环境失败");
    let catalog = &state.catalog_api;
    let only = catalog.add_recording("Paper Moon", None, None, &["June Harbor"]).unwrap();

    let usage_id = insert_usage(&state, "paper moon", "JUNE HARBOR", None, dec!(10.0), dec!(0.0));
    let result = catalog.predict_match(usage_id).unwrap().expect("应有唯一候选");
    assert_eq!(result.recording_id, Some(only));
    assert_eq!(result.method, MatchMethod::Fuzzy);
    // 预测不写入
    assert_eq!(catalog.get_usage(usage_id).unwrap().match_state, MatchState::Unmatched);

    // 第二条同名录音出现后不再猜测
    catalog.add_recording("Paper Moon", None, None, &["June Harbor"]).unwrap();
    assert!(catalog.predict_match(usage_id).unwrap().is_none());
}

#[test]
fn test_locked_records_are_untouched() {
    let (_tmp, state) = create_test_state().expect("创建测试环境失败");
    let catalog = &state.catalog_api;
    let recording = catalog
        .add_recording("Glass Harbor", Some("GBUM71029604"), None, &["Nova Line"])
        .unwrap();

    let locked_id = insert_usage(&state, "Glass Harbor", "Nova Line", Some("GBUM71029604"), dec!(5.0), dec!(0.0));
    let open_id = insert_usage(&state, "Glass Harbor (Live)", "Nova Line", Some("GBUM71029604"), dec!(7.0), dec!(0.0));
    catalog.lock(locked_id).unwrap();

    let stats = catalog.auto_match_pending(100).unwrap();
    assert_eq!(stats.matched, 1);
    assert_eq!(stats.failed, 0);

    let locked = catalog.get_usage(locked_id).unwrap();
    assert_eq!(locked.match_state, MatchState::Locked);
    assert_eq!(locked.recording_id, None);
    assert_eq!(catalog.get_usage(open_id).unwrap().recording_id, Some(recording));

    // 锁定时拒绝单条自动匹配 / 人工匹配 / 重置
    assert!(matches!(state.matching.auto_match(locked_id), Err(AppError::Precondition(_))));
    assert_eq!(catalog.match_recording(locked_id, recording).unwrap_err().code(), "PRECONDITION");
    assert!(catalog.reset(locked_id).is_err());

    // 解锁: 无匹配实体 → 未匹配
    catalog.unlock(locked_id).unwrap();
    assert_eq!(catalog.get_usage(locked_id).unwrap().match_state, MatchState::Unmatched);
}

#[test]
fn test_manual_match_and_reset() {
    let (_tmp, state) = create_test_state().expect("创建测试环境失败");
    let catalog = &state.catalog_api;
    let work = catalog.add_work("Paper Moon", Some("T-034.524.680-1")).unwrap();
    let recording = catalog
        .add_recording("Paper Moon", None, Some(work), &["June Harbor"])
        .unwrap();
    let usage_id = insert_usage(&state, "Unknown", "Somebody", None, dec!(1.0), dec!(0.0));

    catalog.match_recording(usage_id, recording).unwrap();
    let record = catalog.get_usage(usage_id).unwrap();
    assert_eq!(record.match_state, MatchState::ManuallyMatched);
    assert_eq!(record.work_id, Some(work));
    assert_eq!(record.confidence, 1.0);

    // 锁定再解锁 → 保留人工匹配
    catalog.lock(usage_id).unwrap();
    catalog.unlock(usage_id).unwrap();
    assert_eq!(catalog.get_usage(usage_id).unwrap().match_state, MatchState::ManuallyMatched);

    catalog.reset(usage_id).unwrap();
    let record = usage_repo(&state).find_by_id(usage_id).unwrap();
    assert_eq!(record.match_state, MatchState::Unmatched);
    assert_eq!(record.recording_id, None);

    // 不存在的录音
    assert!(catalog.match_recording(usage_id, 9_999).is_err());
}

#[test]
fn test_batch_auto_match_continues_past_failed_record() {
    let (_tmp, state) = create_test_state().expect("创建测试环境失败");
    let recording = state
        .catalog_api
        .add_recording("Glass Harbor", Some("GBUM71029604"), None, &["Nova Line"])
        .unwrap();

    let ids: Vec<i64> = ["Glass Harbor", "Glass Harbor (Radio Edit)", "Glass Harbor (Live)"]
        .iter()
        .map(|track| insert_usage(&state, track, "Nova Line", Some("GBUM71029604"), dec!(3.00), dec!(0)))
        .collect();

    // 选出记录后、写入匹配前删除中间一条
    let repo = usage_repo(&state);
    let records = repo.find_by_ids(&ids).unwrap();
    assert_eq!(records.len(), 3);
    {
        let conn = repo.get_conn().unwrap();
        royalty_recon::repository::UsageRepository::delete_tx(&conn, ids[1]).unwrap();
    }

    let stats = state.matching.auto_match_records(&records).unwrap();
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.matched, 2);

    for id in [ids[0], ids[2]] {
        let record = repo.find_by_id(id).unwrap();
        assert_eq!(record.match_state, MatchState::AutoMatched);
        assert_eq!(record.recording_id, Some(recording));
    }
    assert!(repo.find_by_id(ids[1]).is_err());
}
