use super::*;
use contracts::EngineConfig;

fn test_state() -> AppState {
    AppState::new(Arc::new(LedgerService::in_memory(EngineConfig::default())))
}

#[test]
fn ledger_errors_map_to_http_statuses() {
    let unknown_tier = HttpApiError::from_ledger(LedgerError::UnknownTier("DIAMOND".to_string()));
    assert_eq!(unknown_tier.status, StatusCode::BAD_REQUEST);
    assert_eq!(unknown_tier.error.error_code, ErrorCode::UnknownTier);

    let busy = HttpApiError::from_ledger(LedgerError::AlreadyRunning(JobKind::DailyAccrual));
    assert_eq!(busy.status, StatusCode::CONFLICT);
    assert_eq!(busy.error.error_code, ErrorCode::AlreadyRunning);

    let missing = HttpApiError::from_ledger(LedgerError::UnknownUser("ghost".to_string()));
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let store = HttpApiError::from_ledger(LedgerError::StoreWriteFailure(StoreError::Write(
        "disk full".to_string(),
    )));
    assert_eq!(store.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(store.error.error_code, ErrorCode::StoreWriteFailure);
}

#[test]
fn job_path_accepts_short_and_full_names() {
    assert_eq!(parse_job("accrual").expect("short"), JobKind::DailyAccrual);
    assert_eq!(
        parse_job("retention_sweep").expect("full"),
        JobKind::RetentionSweep
    );
    let err = parse_job("payroll").expect_err("unknown job");
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn quote_and_validate_follow_plan_table() {
    let state = test_state();

    let Json(quote) = quote_plan(
        State(state.clone()),
        Query(PlanAmountQuery {
            tier: "TIER_1".to_string(),
            amount: 5_000.0,
        }),
    )
    .await
    .expect("quote");
    assert!((quote.maturity_amount - 23_000.0).abs() < 1e-9);

    let err = validate_amount(
        State(state),
        Query(PlanAmountQuery {
            tier: "TIER_3".to_string(),
            amount: 10_000.0,
        }),
    )
    .await
    .expect_err("below tier minimum");
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(err.error.error_code, ErrorCode::OutOfRange);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deposit_then_manual_accrual_round_trip() {
    let state = test_state();
    for (user_id, referrer_id) in [("ref", None), ("inv", Some("ref".to_string()))] {
        enroll_user(
            State(state.clone()),
            Json(EnrollRequest {
                user_id: user_id.to_string(),
                username: user_id.to_string(),
                referrer_id,
            }),
        )
        .await
        .expect("enroll");
    }

    let Json(investment) = open_investment(
        State(state.clone()),
        Json(DepositBody {
            user_id: "inv".to_string(),
            tier: "SILVER".to_string(),
            amount: 5_000.0,
        }),
    )
    .await
    .expect("deposit");
    assert!((investment.daily_rate - 0.02).abs() < 1e-12);

    let Json(result) = trigger_accrual(State(state.clone())).await.expect("trigger");
    assert!(result.success);
    assert_eq!(result.processed_count, 1);

    let Json(summary) = get_account_summary(State(state.clone()), Path("ref".to_string()))
        .await
        .expect("summary");
    assert!((summary.commission_total - 500.0).abs() < 1e-9);

    let Json(detail) = get_investment(
        State(state.clone()),
        Path(investment.investment_id.clone()),
        Query(HistoryQuery { limit: None }),
    )
    .await
    .expect("investment detail");
    assert_eq!(detail.investment.accrued_days, 1);
    assert_eq!(detail.history.len(), 1);
    assert!((detail.history[0].amount - 100.0).abs() < 1e-9);

    let missing = get_investment(
        State(state.clone()),
        Path("inv_missing".to_string()),
        Query(HistoryQuery { limit: Some(5) }),
    )
    .await
    .expect_err("unknown investment");
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let Json(status) = get_scheduler_status(State(state)).await;
    assert!(!status.is_running);
    assert!(status.last_run.is_some());
}
