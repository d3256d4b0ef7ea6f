use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use contracts::{
    AccrualHistoryEntry, BalanceCounter, CommissionEntry, CommissionPolicy, EngineConfig,
    ErrorCode, HistoryKind, Investment, JobKind, JobReport, JobState, ReferralEdge, User,
};
use ledger_api::{spawn_scheduler, LedgerService};
use ledger_core::store::{EdgeDelta, NewCommissionEntry, NewHistoryEntry};
use ledger_core::{LedgerError, LedgerStore, MemoryLedger, StoreError};

fn temp_db_path(label: &str) -> std::path::PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    std::env::temp_dir().join(format!("ledger_service_{label}_{nanos}.sqlite"))
}

fn seed(service: &LedgerService) -> Investment {
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
    service.enroll_user("a", "alice", None, now).expect("enroll a");
    service.enroll_user("b", "bob", Some("a"), now).expect("enroll b");
    service
        .open_investment("b", "TIER_1", 5_000.0, now)
        .expect("open investment")
}

#[test]
fn manual_accrual_is_rejected_while_accrual_runs() {
    let service = LedgerService::in_memory(EngineConfig::default());
    seed(&service);
    let now = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

    let held = service
        .jobs()
        .gate(JobKind::DailyAccrual)
        .try_begin(now)
        .expect("hold gate");

    let rejected = service.trigger_manual_accrual(now);
    assert!(!rejected.success);
    assert_eq!(rejected.message.as_deref(), Some("Already running"));
    assert_eq!(rejected.processed_count, 0);

    let err = service
        .run_job(JobKind::DailyAccrual, now)
        .expect_err("second run");
    assert_eq!(err, LedgerError::AlreadyRunning(JobKind::DailyAccrual));
    assert_eq!(err.code(), ErrorCode::AlreadyRunning);

    // Other jobs are gated independently.
    assert!(service.run_job(JobKind::RetentionSweep, now).is_ok());

    held.finish(now, 0, 0);
    let accepted = service.trigger_manual_accrual(now);
    assert!(accepted.success);
    assert_eq!(accepted.processed_count, 1);

    let status = service.scheduler_status(now);
    assert!(!status.is_running);
    assert_eq!(status.jobs[0].last_processed, 1);
}

#[test]
fn jobs_run_through_sqlite_store() {
    let path = temp_db_path("jobs");
    let config = EngineConfig {
        sqlite_path: Some(path.display().to_string()),
        commission_policy: CommissionPolicy::PerAccrual,
        ..EngineConfig::default()
    };
    let service = LedgerService::open_sqlite(config).expect("open sqlite service");
    let investment = seed(&service);

    let day_one = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
    let first = service
        .run_job(JobKind::DailyAccrual, day_one)
        .expect("first accrual");
    assert_eq!(first.processed(), 1);
    let again = service
        .run_job(JobKind::DailyAccrual, day_one)
        .expect("repeat accrual");
    assert_eq!(again.processed(), 0);

    let summary = service.account_summary("a").expect("summary");
    assert!((summary.commission_total - 500.0).abs() < 1e-9);
    assert_eq!(summary.downline.direct, 1);

    let matured_at = investment.end_at + Duration::minutes(30);
    match service
        .run_job(JobKind::MaturitySweep, matured_at)
        .expect("maturity")
    {
        JobReport::MaturitySweep(report) => assert_eq!(report.completed_count, 1),
        other => panic!("unexpected report {other:?}"),
    }
    let owner = service.store().user("b").unwrap().expect("owner");
    assert_eq!(owner.active_investments, 0);
    assert!((owner.available_balance - 5_100.0).abs() < 1e-9);

    let err = service
        .mature_investment(&investment.investment_id, matured_at)
        .expect_err("already completed");
    assert_eq!(err.code(), ErrorCode::InvestmentNotActive);

    drop(service);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn retention_job_keeps_recent_and_maturity_rows() {
    let store = Arc::new(MemoryLedger::new());
    let now = Utc.with_ymd_and_hms(2026, 6, 7, 2, 0, 0).unwrap();
    let today = now.date_naive();
    store.backdate_history("u", "inv", 1.0, today - Duration::days(400), HistoryKind::DailyReturn);
    store.backdate_history("u", "inv", 1.0, today - Duration::days(10), HistoryKind::DailyReturn);
    store.backdate_history("u", "inv", 1.0, today - Duration::days(400), HistoryKind::Maturity);

    let service = LedgerService::new(store.clone(), EngineConfig::default());
    let report = service
        .run_job(JobKind::RetentionSweep, now)
        .expect("retention");
    assert_eq!(report, JobReport::RetentionSweep(contracts::PurgeReport {
        cutoff: today - Duration::days(365),
        deleted_count: 1,
    }));
    assert_eq!(store.history().len(), 2);
}

/// Delegates to `MemoryLedger` but blows up when the accrual batch selects.
struct PanickingLedger {
    inner: MemoryLedger,
}

impl LedgerStore for PanickingLedger {
    fn insert_user(&self, user: User) -> Result<(), StoreError> {
        self.inner.insert_user(user)
    }
    fn user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        self.inner.user(user_id)
    }
    fn referrer_of(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        self.inner.referrer_of(user_id)
    }
    fn direct_referrals(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        self.inner.direct_referrals(user_id)
    }
    fn update_user_balance(
        &self,
        user_id: &str,
        delta: f64,
        counter: BalanceCounter,
    ) -> Result<(), StoreError> {
        self.inner.update_user_balance(user_id, delta, counter)
    }
    fn insert_investment(&self, investment: Investment) -> Result<(), StoreError> {
        self.inner.insert_investment(investment)
    }
    fn investment(&self, investment_id: &str) -> Result<Option<Investment>, StoreError> {
        self.inner.investment(investment_id)
    }
    fn investments_due_for_accrual(&self, _as_of: NaiveDate) -> Result<Vec<Investment>, StoreError> {
        panic!("selection exploded")
    }
    fn investments_past_end_date(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Investment>, StoreError> {
        self.inner.investments_past_end_date(now)
    }
    fn mark_accrued(
        &self,
        investment_id: &str,
        credit: f64,
        as_of: NaiveDate,
    ) -> Result<bool, StoreError> {
        self.inner.mark_accrued(investment_id, credit, as_of)
    }
    fn mark_completed(&self, investment_id: &str) -> Result<bool, StoreError> {
        self.inner.mark_completed(investment_id)
    }
    fn append_history_entry(
        &self,
        entry: NewHistoryEntry,
    ) -> Result<AccrualHistoryEntry, StoreError> {
        self.inner.append_history_entry(entry)
    }
    fn append_commission_entry(
        &self,
        entry: NewCommissionEntry,
    ) -> Result<CommissionEntry, StoreError> {
        self.inner.append_commission_entry(entry)
    }
    fn upsert_referral_edge(&self, delta: &EdgeDelta) -> Result<(), StoreError> {
        self.inner.upsert_referral_edge(delta)
    }
    fn history_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<AccrualHistoryEntry>, StoreError> {
        self.inner.history_for_user(user_id, limit)
    }
    fn history_for_investment(
        &self,
        investment_id: &str,
        limit: usize,
    ) -> Result<Vec<AccrualHistoryEntry>, StoreError> {
        self.inner.history_for_investment(investment_id, limit)
    }
    fn commissions_for_user(&self, user_id: &str) -> Result<Vec<CommissionEntry>, StoreError> {
        self.inner.commissions_for_user(user_id)
    }
    fn referral_edge(
        &self,
        beneficiary_id: &str,
        originator_id: &str,
    ) -> Result<Option<ReferralEdge>, StoreError> {
        self.inner.referral_edge(beneficiary_id, originator_id)
    }
    fn delete_history_entries_older_than(
        &self,
        kind: HistoryKind,
        cutoff: NaiveDate,
    ) -> Result<usize, StoreError> {
        self.inner.delete_history_entries_older_than(kind, cutoff)
    }
}

#[test]
fn panicking_batch_releases_gate_and_records_error() {
    let service = LedgerService::new(
        Arc::new(PanickingLedger {
            inner: MemoryLedger::new(),
        }),
        EngineConfig::default(),
    );
    let now = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

    let err = service
        .run_job(JobKind::DailyAccrual, now)
        .expect_err("panic surfaces as error");
    assert!(matches!(
        &err,
        LedgerError::JobAborted { job: JobKind::DailyAccrual, reason } if reason.contains("selection exploded")
    ));

    let status = service.scheduler_status(now);
    let accrual = &status.jobs[0];
    assert_eq!(accrual.state, JobState::Idle);
    assert!(accrual
        .last_error
        .as_deref()
        .is_some_and(|reason| reason.contains("selection exploded")));

    let retry = service.trigger_manual_accrual(now);
    assert!(!retry.success);
    assert_ne!(retry.message.as_deref(), Some("Already running"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatch_runs_on_blocking_pool() {
    let service = Arc::new(LedgerService::in_memory(EngineConfig::default()));
    seed(&service);
    let now = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

    let report = service
        .dispatch(JobKind::DailyAccrual, now)
        .await
        .expect("dispatch");
    assert_eq!(report.job(), JobKind::DailyAccrual);
    assert_eq!(report.processed(), 1);
}

#[tokio::test]
async fn scheduler_stops_cleanly_before_first_fire() {
    let service = Arc::new(LedgerService::in_memory(EngineConfig::default()));
    let handle = spawn_scheduler(Arc::clone(&service));
    tokio::task::yield_now().await;
    handle.stop().await;

    let status = service.scheduler_status(Utc::now());
    assert!(status
        .jobs
        .iter()
        .all(|job| job.state == JobState::Idle && job.last_started_at.is_none()));
}
