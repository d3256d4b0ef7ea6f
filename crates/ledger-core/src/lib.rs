//! Accrual, commission, maturity, and retention engine over an abstract
//! ledger store.

pub mod accounts;
pub mod accrual;
pub mod commission;
pub mod error;
pub mod maturity;
pub mod memory;
pub mod plan;
pub mod referral;
pub mod retention;
pub mod scheduler;
pub mod store;

pub use accounts::{
    account_summary, enroll_user, investment_detail, open_investment, DepositRequest,
};
pub use accrual::AccrualProcessor;
pub use commission::distribute;
pub use error::{LedgerError, StoreError};
pub use maturity::{mature_investment, run_maturity_sweep};
pub use memory::MemoryLedger;
pub use retention::purge_old_history;
pub use scheduler::{next_fire, next_fire_after, JobBoard, JobGate, JobRun};
pub use store::LedgerStore;
