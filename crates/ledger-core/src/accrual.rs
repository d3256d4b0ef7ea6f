//! Daily return accrual.
//!
//! A run for day `D` touches only investments whose stored state still
//! satisfies the accrual predicate for `D`, and the store re-checks that
//! predicate inside the same atomic unit that applies the credit. Re-running
//! a day after a partial failure therefore credits only what was missed.

use chrono::NaiveDate;
use contracts::{AccrualReport, CommissionPolicy, Investment};
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::commission;
use crate::error::LedgerError;
use crate::store::{AccrualPosting, LedgerStore, PostingOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccrualStep {
    Credited { commission_levels: usize },
    AlreadyAccrued,
}

#[derive(Debug)]
pub struct AccrualProcessor {
    policy: CommissionPolicy,
    pool: Option<rayon::ThreadPool>,
}

impl AccrualProcessor {
    pub fn new(policy: CommissionPolicy, worker_threads: u16) -> Self {
        let worker_threads = usize::from(worker_threads.max(1));
        let pool = if worker_threads > 1 {
            accept_pool(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(worker_threads)
                    .thread_name(|idx| format!("accrual-{idx}"))
                    .build(),
                worker_threads,
            )
        } else {
            None
        };
        Self { policy, pool }
    }

    pub fn policy(&self) -> CommissionPolicy {
        self.policy
    }

    /// Threads the batch actually fans out over; 1 when sequential.
    pub fn worker_threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or(1, rayon::ThreadPool::current_num_threads)
    }

    /// Credits one day of return on every due investment. Never fails as a
    /// whole: investments that error are listed in `failures` and the rest
    /// of the batch proceeds.
    pub fn run_daily_accrual<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        as_of: NaiveDate,
    ) -> AccrualReport {
        let mut report = AccrualReport {
            as_of,
            processed_count: 0,
            already_accrued_count: 0,
            commission_levels_credited: 0,
            failures: Vec::new(),
        };

        let due = match store.investments_due_for_accrual(as_of) {
            Ok(due) => due,
            Err(err) => {
                error!(%as_of, error = %err, "failed to select investments due for accrual");
                return report;
            }
        };
        info!(%as_of, due = due.len(), "daily accrual started");

        let outcomes = match self.pool.as_ref() {
            Some(pool) => pool.install(|| {
                due.par_iter()
                    .map(|investment| self.accrue_one(store, investment, as_of))
                    .collect::<Vec<_>>()
            }),
            None => due
                .iter()
                .map(|investment| self.accrue_one(store, investment, as_of))
                .collect::<Vec<_>>(),
        };

        for (investment, outcome) in due.iter().zip(outcomes) {
            match outcome {
                Ok(AccrualStep::Credited { commission_levels }) => {
                    report.processed_count += 1;
                    report.commission_levels_credited += commission_levels;
                }
                Ok(AccrualStep::AlreadyAccrued) => report.already_accrued_count += 1,
                Err(err) => {
                    error!(
                        investment_id = %investment.investment_id,
                        error = %err,
                        "accrual failed for investment"
                    );
                    report.failures.push(investment.investment_id.clone());
                }
            }
        }

        info!(
            %as_of,
            processed = report.processed_count,
            already_accrued = report.already_accrued_count,
            failures = report.failures.len(),
            "daily accrual finished"
        );
        report
    }

    fn accrue_one<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        investment: &Investment,
        as_of: NaiveDate,
    ) -> Result<AccrualStep, LedgerError> {
        let posting = AccrualPosting {
            investment_id: investment.investment_id.clone(),
            user_id: investment.user_id.clone(),
            credit: investment.daily_credit(),
            as_of,
        };

        if store.apply_accrual(&posting)? == PostingOutcome::AlreadyApplied {
            warn!(
                investment_id = %investment.investment_id,
                %as_of,
                "investment already accrued for this day"
            );
            return Ok(AccrualStep::AlreadyAccrued);
        }

        let commission_levels = match self.policy {
            CommissionPolicy::PerAccrual => commission::distribute(
                store,
                &investment.user_id,
                investment.principal,
                &investment.investment_id,
                as_of,
            )?,
            CommissionPolicy::OncePerInvestment => 0,
        };

        Ok(AccrualStep::Credited { commission_levels })
    }
}

impl Default for AccrualProcessor {
    fn default() -> Self {
        Self::new(CommissionPolicy::default(), 1)
    }
}

fn accept_pool(
    built: Result<rayon::ThreadPool, rayon::ThreadPoolBuildError>,
    worker_threads: usize,
) -> Option<rayon::ThreadPool> {
    match built {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!(
                worker_threads,
                error = %err,
                "accrual worker pool unavailable, processing sequentially"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn requested_workers_back_a_pool() {
        assert_eq!(
            AccrualProcessor::new(CommissionPolicy::PerAccrual, 3).worker_threads(),
            3
        );
        assert_eq!(
            AccrualProcessor::new(CommissionPolicy::PerAccrual, 0).worker_threads(),
            1
        );
    }

    #[test]
    fn failed_pool_build_falls_back_to_sequential() {
        let built = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .spawn_handler(|_| Err(io::Error::new(io::ErrorKind::Other, "no threads")))
            .build();
        assert!(built.is_err());
        assert!(accept_pool(built, 2).is_none());
    }
}
