// ==========================================
// 结算单与付款全流程测试
// ==========================================
// 场景: 预付款 500 → 使用收益 90 → 台账余额 410
//       结算单应付 90 → 付款过账后自动 PAID → 付款回退后退回 APPROVED
// ==========================================

use royalty_recon::api::NewStatementInput;
use royalty_recon::domain::types::{Bucket, PaymentState, StatementState};
use royalty_recon::error::AppError;
use rust_decimal_macros::dec;

use test_helpers::{assert_amount, create_test_state, insert_usage, sample_deal, usage_repo};

const PARTNER: i64 = 7;

fn statement_input() -> NewStatementInput {
    NewStatementInput {
        partner_id: PARTNER,
        period_start: "2024-01-01".to_string(),
        period_end: "2024-03-31".to_string(),
        currency: "usd".to_string(),
        statement_date: "2024-04-15".to_string(),
    }
}

#[test]
fn test_full_settlement_flow() {
    let (_tmp, state) = create_test_state().expect("创建测试环境失败");

    // 台账: 预付款 500，收益 90 → 余额 410
    let deal_id = state
        .ledger_api
        .register_deal(&sample_deal(PARTNER, Bucket::Recording, false))
        .unwrap();
    state
        .ledger_api
        .post_advance(1, deal_id, None, dec!(500.0), "2023-12-01")
        .unwrap();
    let usage_id = insert_usage(&state, "Song A", "Artist A", None, dec!(100.0), dec!(10.0));
    let income = state.ledger_api.credit_usage(usage_id, deal_id, Some(dec!(90.0)), 0).unwrap();
    assert_amount(income.credit, dec!(90.0));
    assert_amount(income.balance, dec!(410.0));
    let balance = state.ledger_api.balance(PARTNER, "RECORDING", None).unwrap();
    assert_amount(balance.balance, dec!(410.0));

    // 结算单: 净额 90
    let settlement = &state.settlement_api;
    let statement = settlement.create_statement(&statement_input()).unwrap();
    assert_eq!(statement.state, StatementState::Draft);
    assert_eq!(statement.currency, "USD");
    assert!(statement.reference.starts_with("RS/2024/"));

    let statement = settlement.attach_usage(statement.statement_id, &[usage_id]).unwrap();
    assert_amount(statement.totals.gross_total, dec!(100.0));
    assert_amount(statement.totals.fee_total, dec!(10.0));
    assert_amount(statement.totals.net_total, dec!(90.0));
    assert_amount(statement.totals.payable, dec!(90.0));
    assert_eq!(statement.usage_line_count, 1);

    let id = statement.statement_id;
    settlement.statement_action(id, "process").unwrap();
    assert!(usage_repo(&state).find_by_id(usage_id).unwrap().processed);
    settlement.statement_action(id, "send").unwrap();
    let approved = settlement.statement_action(id, "approve").unwrap();
    assert_eq!(approved.state, StatementState::Approved);
    assert_amount(approved.totals.balance_due, dec!(90.0));

    // 付款: 草稿分配不计入已付
    let payment = settlement.create_payment(None, "2024-04-20", "wire", Some("Q1")).unwrap();
    let payment = settlement.allocate(payment.payment_id, id, dec!(90.0)).unwrap();
    assert_eq!(payment.partner_id, Some(PARTNER));
    assert_amount(settlement.get_statement(id).unwrap().totals.paid_amount, dec!(0.0));

    let posted = settlement.payment_action(payment.payment_id, "post").unwrap();
    assert_eq!(posted.state, PaymentState::Posted);
    let paid = settlement.get_statement(id).unwrap();
    assert_eq!(paid.state, StatementState::Paid);
    assert_amount(paid.totals.balance_due, dec!(0.0));
    assert!(paid.paid_date.is_some());

    // 付款回退为草稿 → 结算单退回 APPROVED
    settlement.payment_action(payment.payment_id, "reset").unwrap();
    let reverted = settlement.get_statement(id).unwrap();
    assert_eq!(reverted.state, StatementState::Approved);
    assert!(reverted.paid_date.is_none());
    assert_amount(reverted.totals.balance_due, dec!(90.0));
}

#[test]
fn test_statement_recoupment_reduces_payable() {
    let (_tmp, state) = create_test_state().expect("创建测试环境失败");
    let deal_id = state
        .ledger_api
        .register_deal(&sample_deal(PARTNER, Bucket::Recording, false))
        .unwrap();
    state
        .ledger_api
        .post_advance(1, deal_id, None, dec!(50.0), "2023-12-01")
        .unwrap();
    let usage_id = insert_usage(&state, "Song A", "Artist A", None, dec!(100.0), dec!(10.0));

    let statement = state.settlement_api.create_statement(&statement_input()).unwrap();
    state
        .settlement_api
        .attach_usage(statement.statement_id, &[usage_id])
        .unwrap();

    // 回收额 = min(净额 90, 未回收 50)
    let entry = state
        .ledger_api
        .recoup_statement(statement.statement_id, Some("RECORDING"))
        .unwrap()
        .expect("应产生回收分录");
    assert_amount(entry.credit, dec!(50.0));
    assert_amount(entry.balance, dec!(0.0));

    let statement = state.settlement_api.get_statement(statement.statement_id).unwrap();
    assert_amount(statement.totals.recouped_amount, dec!(50.0));
    assert_amount(statement.totals.payable, dec!(40.0));

    // 已无未回收余额，不再过账
    assert!(state
        .ledger_api
        .recoup_statement(statement.statement_id, Some("RECORDING"))
        .unwrap()
        .is_none());

    // 删除回收分录后结算单恢复
    state.ledger_api.delete_entry(entry.entry_id).unwrap();
    let statement = state.settlement_api.get_statement(statement.statement_id).unwrap();
    assert_amount(statement.totals.payable, dec!(90.0));
}

#[test]
fn test_usage_belongs_to_one_statement() {
    let (_tmp, state) = create_test_state().expect("创建测试环境失败");
    let usage_id = insert_usage(&state, "Song A", "Artist A", None, dec!(20.0), dec!(0.0));

    let first = state.settlement_api.create_statement(&statement_input()).unwrap();
    let second = state.settlement_api.create_statement(&statement_input()).unwrap();
    state.settlement_api.attach_usage(first.statement_id, &[usage_id]).unwrap();

    let err = state
        .statements
        .attach_usage(second.statement_id, &[usage_id])
        .unwrap_err();
    assert!(matches!(err, AppError::Precondition(_)));

    // 取消后释放
    state.settlement_api.statement_action(first.statement_id, "cancel").unwrap();
    let second = state.settlement_api.attach_usage(second.statement_id, &[usage_id]).unwrap();
    assert_amount(second.totals.net_total, dec!(20.0));
    assert_amount(
        state.settlement_api.get_statement(first.statement_id).unwrap().totals.net_total,
        dec!(0.0),
    );
}

#[test]
fn test_payment_rules() {
    let (_tmp, state) = create_test_state().expect("创建测试环境失败");
    let settlement = &state.settlement_api;
    let statement = settlement.create_statement(&statement_input()).unwrap();

    let payment = settlement.create_payment(Some(99), "2024-04-20", "check", None).unwrap();
    // 收款方不一致
    let err = settlement.allocate(payment.payment_id, statement.statement_id, dec!(10.0)).unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
    // 非正金额
    assert!(settlement.allocate(payment.payment_id, statement.statement_id, dec!(0.0)).is_err());
    // 无分配不能过账
    let err = settlement.payment_action(payment.payment_id, "post").unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
    // 未知操作
    assert!(settlement.payment_action(payment.payment_id, "refund").is_err());
}
