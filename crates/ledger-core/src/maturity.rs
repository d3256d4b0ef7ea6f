//! ACTIVE -> COMPLETED transition and return of principal.

use chrono::{DateTime, NaiveDate, Utc};
use contracts::{Investment, InvestmentStatus, MaturityReport};
use tracing::{error, info};

use crate::error::LedgerError;
use crate::store::{LedgerStore, MaturityPosting, PostingOutcome};

/// Completes every active investment whose end instant is at or before
/// `now`. The status guard makes a repeated sweep a no-op.
pub fn run_maturity_sweep<S: LedgerStore + ?Sized>(
    store: &S,
    now: DateTime<Utc>,
) -> MaturityReport {
    let as_of = now.date_naive();
    let mut report = MaturityReport {
        as_of,
        completed_count: 0,
        failures: Vec::new(),
    };

    let matured = match store.investments_past_end_date(now) {
        Ok(matured) => matured,
        Err(err) => {
            error!(%as_of, error = %err, "failed to select matured investments");
            return report;
        }
    };
    info!(%as_of, matured = matured.len(), "maturity sweep started");

    for investment in &matured {
        match complete(store, investment, as_of) {
            Ok(PostingOutcome::Applied) => report.completed_count += 1,
            Ok(PostingOutcome::AlreadyApplied) => {}
            Err(err) => {
                error!(
                    investment_id = %investment.investment_id,
                    error = %err,
                    "maturity failed for investment"
                );
                report.failures.push(investment.investment_id.clone());
            }
        }
    }

    info!(
        %as_of,
        completed = report.completed_count,
        failures = report.failures.len(),
        "maturity sweep finished"
    );
    report
}

/// Completes a single investment regardless of its end date.
pub fn mature_investment<S: LedgerStore + ?Sized>(
    store: &S,
    investment_id: &str,
    as_of: NaiveDate,
) -> Result<Investment, LedgerError> {
    let investment = store
        .investment(investment_id)?
        .ok_or_else(|| LedgerError::UnknownInvestment(investment_id.to_string()))?;
    if investment.status != InvestmentStatus::Active {
        return Err(LedgerError::InvestmentNotActive(investment_id.to_string()));
    }
    if complete(store, &investment, as_of)? == PostingOutcome::AlreadyApplied {
        return Err(LedgerError::InvestmentNotActive(investment_id.to_string()));
    }
    store
        .investment(investment_id)?
        .ok_or_else(|| LedgerError::UnknownInvestment(investment_id.to_string()))
}

fn complete<S: LedgerStore + ?Sized>(
    store: &S,
    investment: &Investment,
    as_of: NaiveDate,
) -> Result<PostingOutcome, LedgerError> {
    Ok(store.apply_maturity(&MaturityPosting {
        investment_id: investment.investment_id.clone(),
        user_id: investment.user_id.clone(),
        principal: investment.principal,
        as_of,
    })?)
}
