//! Service facade over the ledger engine with SQLite persistence, the job
//! scheduler runtime, and the HTTP adapter.

mod config;
mod persistence;
mod scheduler;
mod server;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use contracts::{
    AccountSummary, DownlineSummary, EngineConfig, Investment, InvestmentDetail, JobKind,
    JobReport, ManualAccrualResult, PlanTerms, ProjectedReturn, SchedulerStatus, User,
    MAX_COMMISSION_DEPTH,
};
use ledger_core::retention::retention_window;
use ledger_core::{
    plan, referral, AccrualProcessor, DepositRequest, JobBoard, LedgerError, LedgerStore,
    MemoryLedger,
};
use tracing::{error, info, warn};

pub use config::{load_config_file, load_engine_config, sqlite_path, ConfigError};
pub use persistence::{PersistenceError, SqliteLedgerStore};
pub use scheduler::{spawn_scheduler, SchedulerHandle};
pub use server::{serve_with_shutdown, ServerError};

const SUMMARY_HISTORY_LIMIT: usize = 20;

pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    config: EngineConfig,
    processor: AccrualProcessor,
    jobs: JobBoard,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, config: EngineConfig) -> Self {
        let processor =
            AccrualProcessor::new(config.commission_policy, config.accrual_worker_threads);
        Self {
            store,
            config,
            processor,
            jobs: JobBoard::new(),
        }
    }

    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(MemoryLedger::new()), config)
    }

    pub fn open_sqlite(config: EngineConfig) -> Result<Self, PersistenceError> {
        let path = sqlite_path(&config);
        let store = SqliteLedgerStore::open(&path)?;
        info!(%path, "sqlite ledger store attached");
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }

    pub fn jobs(&self) -> &JobBoard {
        &self.jobs
    }

    /// Runs one job under its gate on the calling thread. A panic inside the
    /// batch is caught, recorded on the gate, and reported as `JobAborted`.
    pub fn run_job(&self, job: JobKind, now: DateTime<Utc>) -> Result<JobReport, LedgerError> {
        let run = self.jobs.gate(job).try_begin(now)?;
        info!(%job, %now, "job started");

        match panic::catch_unwind(AssertUnwindSafe(|| self.execute(job, now))) {
            Ok(Ok(report)) => {
                info!(
                    %job,
                    processed = report.processed(),
                    failures = report.failure_count(),
                    "job finished"
                );
                run.finish(Utc::now(), report.processed(), report.failure_count());
                Ok(report)
            }
            Ok(Err(err)) => {
                error!(%job, error = %err, "job failed");
                run.abort(Utc::now(), err.to_string());
                Err(err)
            }
            Err(payload) => {
                let reason = panic_reason(payload.as_ref());
                error!(%job, %reason, "job panicked");
                run.abort(Utc::now(), reason.clone());
                Err(LedgerError::JobAborted { job, reason })
            }
        }
    }

    /// `run_job` on the blocking pool, for callers on the async runtime.
    pub async fn dispatch(
        self: &Arc<Self>,
        job: JobKind,
        now: DateTime<Utc>,
    ) -> Result<JobReport, LedgerError> {
        let service = Arc::clone(self);
        match tokio::task::spawn_blocking(move || service.run_job(job, now)).await {
            Ok(result) => result,
            Err(err) => Err(LedgerError::JobAborted {
                job,
                reason: err.to_string(),
            }),
        }
    }

    pub fn trigger_manual_accrual(&self, now: DateTime<Utc>) -> ManualAccrualResult {
        match self.run_job(JobKind::DailyAccrual, now) {
            Ok(JobReport::DailyAccrual(report)) => ManualAccrualResult {
                success: true,
                processed_count: report.processed_count,
                failures: report.failures,
                message: None,
            },
            Ok(other) => ManualAccrualResult {
                success: false,
                processed_count: 0,
                failures: Vec::new(),
                message: Some(format!("unexpected report for {}", other.job())),
            },
            Err(LedgerError::AlreadyRunning(_)) => {
                warn!("manual accrual rejected: already running");
                ManualAccrualResult {
                    success: false,
                    processed_count: 0,
                    failures: Vec::new(),
                    message: Some("Already running".to_string()),
                }
            }
            Err(err) => ManualAccrualResult {
                success: false,
                processed_count: 0,
                failures: Vec::new(),
                message: Some(err.to_string()),
            },
        }
    }

    pub fn scheduler_status(&self, now: DateTime<Utc>) -> SchedulerStatus {
        self.jobs.status(&self.config.schedule, now)
    }

    pub fn plans(&self) -> Vec<PlanTerms> {
        plan::plans().to_vec()
    }

    pub fn projected_return(
        &self,
        amount: f64,
        tier_label: &str,
    ) -> Result<ProjectedReturn, LedgerError> {
        Ok(plan::projected_return(amount, plan::parse_tier(tier_label)?))
    }

    pub fn validate_investment_amount(
        &self,
        tier_label: &str,
        amount: f64,
    ) -> Result<PlanTerms, LedgerError> {
        plan::validate_investment_amount(tier_label, amount)
    }

    pub fn enroll_user(
        &self,
        user_id: &str,
        username: &str,
        referrer_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<User, LedgerError> {
        ledger_core::enroll_user(self.store(), user_id, username, referrer_id, now)
    }

    pub fn open_investment(
        &self,
        user_id: &str,
        tier_label: &str,
        amount: f64,
        now: DateTime<Utc>,
    ) -> Result<Investment, LedgerError> {
        let request = DepositRequest {
            user_id: user_id.to_string(),
            tier: plan::parse_tier(tier_label)?,
            amount,
        };
        ledger_core::open_investment(
            self.store(),
            &request,
            self.config.commission_policy,
            now,
        )
    }

    pub fn mature_investment(
        &self,
        investment_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Investment, LedgerError> {
        ledger_core::mature_investment(self.store(), investment_id, now.date_naive())
    }

    pub fn investment_detail(
        &self,
        investment_id: &str,
        history_limit: usize,
    ) -> Result<InvestmentDetail, LedgerError> {
        ledger_core::investment_detail(self.store(), investment_id, history_limit)
    }

    pub fn account_summary(&self, user_id: &str) -> Result<AccountSummary, LedgerError> {
        ledger_core::account_summary(self.store(), user_id, SUMMARY_HISTORY_LIMIT)
    }

    pub fn downline(&self, user_id: &str) -> Result<DownlineSummary, LedgerError> {
        if self.store.user(user_id)?.is_none() {
            return Err(LedgerError::UnknownUser(user_id.to_string()));
        }
        referral::downline(self.store(), user_id, MAX_COMMISSION_DEPTH)
    }

    fn execute(&self, job: JobKind, now: DateTime<Utc>) -> Result<JobReport, LedgerError> {
        let store = self.store();
        match job {
            JobKind::DailyAccrual => Ok(JobReport::DailyAccrual(
                self.processor.run_daily_accrual(store, now.date_naive()),
            )),
            JobKind::MaturitySweep => Ok(JobReport::MaturitySweep(
                ledger_core::run_maturity_sweep(store, now),
            )),
            JobKind::RetentionSweep => Ok(JobReport::RetentionSweep(
                ledger_core::purge_old_history(
                    store,
                    retention_window(self.config.retention_days),
                    now,
                )?,
            )),
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "job panicked".to_string()
    }
}
