use contracts::{ErrorCode, JobKind, PlanTier};
use thiserror::Error;

/// Failure reported by a `LedgerStore` implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store write failed: {0}")]
    Write(String),

    #[error("store read failed: {0}")]
    Read(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("unknown plan tier: {0}")]
    UnknownTier(String),

    #[error("amount {amount} is outside [{min}, {max}] for {tier}")]
    OutOfRange {
        tier: PlanTier,
        amount: f64,
        min: f64,
        max: f64,
    },

    #[error("investment {0} is not active")]
    InvestmentNotActive(String),

    #[error("unknown investment: {0}")]
    UnknownInvestment(String),

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("invalid referrer for {user_id}: {reason}")]
    InvalidReferrer { user_id: String, reason: String },

    #[error("{0} is already running")]
    AlreadyRunning(JobKind),

    #[error("{job} aborted: {reason}")]
    JobAborted { job: JobKind, reason: String },

    #[error(transparent)]
    StoreWriteFailure(#[from] StoreError),
}

impl LedgerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownTier(_) => ErrorCode::UnknownTier,
            Self::OutOfRange { .. } => ErrorCode::OutOfRange,
            Self::InvestmentNotActive(_) => ErrorCode::InvestmentNotActive,
            Self::UnknownInvestment(_) => ErrorCode::UnknownInvestment,
            Self::UnknownUser(_) => ErrorCode::UnknownUser,
            Self::InvalidReferrer { .. } => ErrorCode::InvalidReferrer,
            Self::AlreadyRunning(_) => ErrorCode::AlreadyRunning,
            Self::JobAborted { .. } => ErrorCode::InternalError,
            Self::StoreWriteFailure(_) => ErrorCode::StoreWriteFailure,
        }
    }
}
