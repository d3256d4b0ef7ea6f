//! v1 cross-boundary contracts for the ledger core, API, persistence, and CLI.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// Number of referrer levels that receive commission on a single event.
pub const MAX_COMMISSION_DEPTH: usize = 5;

/// Commission rate per level, level 1 first.
pub const LEVEL_RATES: [f64; MAX_COMMISSION_DEPTH] = [0.10, 0.05, 0.03, 0.02, 0.01];

pub const DEFAULT_RETENTION_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlanTier {
    #[serde(rename = "TIER_1", alias = "SILVER")]
    Tier1,
    #[serde(rename = "TIER_2", alias = "GOLD")]
    Tier2,
    #[serde(rename = "TIER_3", alias = "PLATINUM")]
    Tier3,
}

impl PlanTier {
    pub const ALL: [PlanTier; 3] = [PlanTier::Tier1, PlanTier::Tier2, PlanTier::Tier3];

    /// Parse a tier label. Accepts the canonical `TIER_n` names (any case)
    /// and the legacy plan names.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "TIER_1" | "TIER1" | "SILVER" => Some(Self::Tier1),
            "TIER_2" | "TIER2" | "GOLD" => Some(Self::Tier2),
            "TIER_3" | "TIER3" | "PLATINUM" => Some(Self::Tier3),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tier1 => "TIER_1",
            Self::Tier2 => "TIER_2",
            Self::Tier3 => "TIER_3",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PlanTerms {
    pub tier: PlanTier,
    pub daily_rate: f64,
    pub duration_days: u32,
    pub min_principal: f64,
    pub max_principal: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProjectedReturn {
    pub tier: PlanTier,
    pub daily_rate: f64,
    pub duration_days: u32,
    pub daily_return: f64,
    pub total_return: f64,
    pub maturity_amount: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvestmentStatus {
    Active,
    Completed,
    Cancelled,
}

impl InvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ACTIVE" => Some(Self::Active),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryKind {
    DailyReturn,
    Maturity,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailyReturn => "DAILY_RETURN",
            Self::Maturity => "MATURITY",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "DAILY_RETURN" => Some(Self::DailyReturn),
            "MATURITY" => Some(Self::Maturity),
            _ => None,
        }
    }
}

/// Which cumulative counter a balance credit is attributed to. The available
/// balance always moves by the delta.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BalanceCounter {
    AvailableOnly,
    CumulativeReturn,
    CumulativeCommission,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub referrer_id: Option<String>,
    pub available_balance: f64,
    pub cumulative_return: f64,
    pub cumulative_commission: f64,
    pub total_investments: u32,
    pub active_investments: u32,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        referrer_id: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            referrer_id,
            available_balance: 0.0,
            cumulative_return: 0.0,
            cumulative_commission: 0.0,
            total_investments: 0,
            active_investments: 0,
            created_at,
        }
    }

    pub fn apply_credit(&mut self, delta: f64, counter: BalanceCounter) {
        self.available_balance += delta;
        match counter {
            BalanceCounter::AvailableOnly => {}
            BalanceCounter::CumulativeReturn => self.cumulative_return += delta,
            BalanceCounter::CumulativeCommission => self.cumulative_commission += delta,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Investment {
    pub investment_id: String,
    pub user_id: String,
    pub principal: f64,
    pub tier: PlanTier,
    pub daily_rate: f64,
    pub duration_days: u32,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: InvestmentStatus,
    pub cumulative_return: f64,
    pub last_accrual_date: Option<NaiveDate>,
    pub accrued_days: u32,
    pub maturity_amount: f64,
}

impl Investment {
    pub fn daily_credit(&self) -> f64 {
        self.principal * self.daily_rate
    }

    /// Contracted ceiling for `cumulative_return`.
    pub fn max_total_return(&self) -> f64 {
        self.daily_credit() * f64::from(self.duration_days)
    }

    /// Selection predicate of the daily accrual run.
    pub fn is_due_for_accrual(&self, as_of: NaiveDate) -> bool {
        self.status == InvestmentStatus::Active
            && self.end_at > start_of_day(as_of)
            && self.last_accrual_date.map_or(true, |last| last < as_of)
            && self.accrued_days < self.duration_days
    }

    /// Selection predicate of the maturity sweep: the end instant itself has
    /// passed, not merely the end date.
    pub fn is_past_end_date(&self, now: DateTime<Utc>) -> bool {
        self.status == InvestmentStatus::Active && self.end_at <= now
    }
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccrualHistoryEntry {
    pub entry_id: u64,
    pub user_id: String,
    pub investment_id: String,
    pub amount: f64,
    pub date: NaiveDate,
    pub kind: HistoryKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommissionEntry {
    pub entry_id: u64,
    pub beneficiary_id: String,
    pub originator_id: String,
    pub level: u8,
    /// Percentage points, e.g. `10.0` for level 1.
    pub percentage: f64,
    pub amount: f64,
    pub investment_id: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferralEdge {
    pub beneficiary_id: String,
    pub originator_id: String,
    pub level: u8,
    pub direct_investment_volume: f64,
    pub cumulative_commission: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccrualReport {
    pub as_of: NaiveDate,
    pub processed_count: usize,
    pub already_accrued_count: usize,
    pub commission_levels_credited: usize,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaturityReport {
    pub as_of: NaiveDate,
    pub completed_count: usize,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PurgeReport {
    pub cutoff: NaiveDate,
    pub deleted_count: usize,
}

/// Outcome of one job run, tagged by job kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobReport {
    DailyAccrual(AccrualReport),
    MaturitySweep(MaturityReport),
    RetentionSweep(PurgeReport),
}

impl JobReport {
    pub fn job(&self) -> JobKind {
        match self {
            Self::DailyAccrual(_) => JobKind::DailyAccrual,
            Self::MaturitySweep(_) => JobKind::MaturitySweep,
            Self::RetentionSweep(_) => JobKind::RetentionSweep,
        }
    }

    pub fn processed(&self) -> usize {
        match self {
            Self::DailyAccrual(report) => report.processed_count,
            Self::MaturitySweep(report) => report.completed_count,
            Self::RetentionSweep(report) => report.deleted_count,
        }
    }

    pub fn failure_count(&self) -> usize {
        match self {
            Self::DailyAccrual(report) => report.failures.len(),
            Self::MaturitySweep(report) => report.failures.len(),
            Self::RetentionSweep(_) => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DownlineSummary {
    pub direct: usize,
    pub total: usize,
    pub by_level: BTreeMap<u8, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountSummary {
    pub schema_version: String,
    pub user: User,
    /// Referrers nearest first, up to the commission depth.
    pub upline: Vec<String>,
    pub recent_history: Vec<AccrualHistoryEntry>,
    pub commission_total: f64,
    pub commission_by_level: BTreeMap<u8, f64>,
    pub downline: DownlineSummary,
}

/// One investment with its own history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvestmentDetail {
    pub schema_version: String,
    pub investment: Investment,
    pub history: Vec<AccrualHistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManualAccrualResult {
    pub success: bool,
    pub processed_count: usize,
    pub failures: Vec<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DailyAccrual,
    MaturitySweep,
    RetentionSweep,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        JobKind::DailyAccrual,
        JobKind::MaturitySweep,
        JobKind::RetentionSweep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailyAccrual => "daily_accrual",
            Self::MaturitySweep => "maturity_sweep",
            Self::RetentionSweep => "retention_sweep",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "daily_accrual" | "accrual" => Some(Self::DailyAccrual),
            "maturity_sweep" | "maturity" => Some(Self::MaturitySweep),
            "retention_sweep" | "retention" => Some(Self::RetentionSweep),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
}

/// Point-in-time view of one job's gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStatus {
    pub job: JobKind,
    pub state: JobState,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_processed: usize,
    pub last_failure_count: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub schema_version: String,
    /// Whether the daily accrual job is currently running.
    pub is_running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub jobs: Vec<JobStatus>,
}

impl fmt::Display for SchedulerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "accrual_running={}", self.is_running)?;
        for job in &self.jobs {
            write!(
                f,
                " {}={:?}(processed={} failures={})",
                job.job, job.state, job.last_processed, job.last_failure_count
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommissionPolicy {
    /// Pay the level table off the principal on every daily accrual.
    #[default]
    PerAccrual,
    /// Pay the level table once, when the investment is opened.
    OncePerInvestment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub accrual_at: NaiveTime,
    pub maturity_at: NaiveTime,
    pub retention_weekday: Weekday,
    pub retention_at: NaiveTime,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            accrual_at: NaiveTime::MIN,
            maturity_at: NaiveTime::from_hms_opt(0, 30, 0).unwrap_or(NaiveTime::MIN),
            retention_weekday: Weekday::Sun,
            retention_at: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub schema_version: String,
    pub commission_policy: CommissionPolicy,
    pub retention_days: u32,
    pub accrual_worker_threads: u16,
    pub schedule: ScheduleConfig,
    pub sqlite_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            commission_policy: CommissionPolicy::PerAccrual,
            retention_days: DEFAULT_RETENTION_DAYS,
            accrual_worker_threads: 1,
            schedule: ScheduleConfig::default(),
            sqlite_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UnknownTier,
    OutOfRange,
    InvestmentNotActive,
    StoreWriteFailure,
    AlreadyRunning,
    UnknownUser,
    UnknownInvestment,
    InvalidReferrer,
    InvalidRequest,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}
