//! Enrollment, deposits, and the per-user read model.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use contracts::{
    AccountSummary, CommissionPolicy, Investment, InvestmentDetail, InvestmentStatus, PlanTier,
    User,
    MAX_COMMISSION_DEPTH, SCHEMA_VERSION_V1,
};
use tracing::info;
use uuid::Uuid;

use crate::commission;
use crate::error::LedgerError;
use crate::plan;
use crate::referral;
use crate::store::{DepositPosting, LedgerStore};

/// Adds a user under an optional referrer. The referrer must already exist,
/// which together with immutable referrer links keeps the tree acyclic.
pub fn enroll_user<S: LedgerStore + ?Sized>(
    store: &S,
    user_id: &str,
    username: &str,
    referrer_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<User, LedgerError> {
    if let Some(referrer_id) = referrer_id {
        if referrer_id == user_id {
            return Err(LedgerError::InvalidReferrer {
                user_id: user_id.to_string(),
                reason: "user cannot refer themselves".to_string(),
            });
        }
        if store.user(referrer_id)?.is_none() {
            return Err(LedgerError::InvalidReferrer {
                user_id: user_id.to_string(),
                reason: format!("referrer {referrer_id} does not exist"),
            });
        }
    }

    let user = User::new(user_id, username, referrer_id.map(str::to_string), now);
    store.insert_user(user.clone())?;
    Ok(user)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepositRequest {
    pub user_id: String,
    pub tier: PlanTier,
    pub amount: f64,
}

/// Validates the amount against the tier and opens an ACTIVE investment.
/// Under `OncePerInvestment` the referrer chain is paid here, once, in the
/// same store unit as the investment: either both land or neither does.
pub fn open_investment<S: LedgerStore + ?Sized>(
    store: &S,
    request: &DepositRequest,
    policy: CommissionPolicy,
    now: DateTime<Utc>,
) -> Result<Investment, LedgerError> {
    let terms = plan::validate(request.tier, request.amount)?;
    if store.user(&request.user_id)?.is_none() {
        return Err(LedgerError::UnknownUser(request.user_id.clone()));
    }

    let projection = plan::projected_return(request.amount, request.tier);
    let investment = Investment {
        investment_id: format!("inv_{}", Uuid::new_v4().simple()),
        user_id: request.user_id.clone(),
        principal: request.amount,
        tier: request.tier,
        daily_rate: terms.daily_rate,
        duration_days: terms.duration_days,
        start_at: now,
        end_at: now + Duration::days(i64::from(terms.duration_days)),
        status: InvestmentStatus::Active,
        cumulative_return: 0.0,
        last_accrual_date: None,
        accrued_days: 0,
        maturity_amount: projection.maturity_amount,
    };
    let commissions = match policy {
        CommissionPolicy::OncePerInvestment => commission::plan_postings(
            store,
            &investment.user_id,
            investment.principal,
            &investment.investment_id,
            now.date_naive(),
        )?,
        CommissionPolicy::PerAccrual => Vec::new(),
    };
    let commission_levels = commissions.len();

    store.apply_deposit(&DepositPosting {
        investment: investment.clone(),
        commissions,
    })?;
    info!(
        investment_id = %investment.investment_id,
        user_id = %investment.user_id,
        tier = %investment.tier,
        principal = investment.principal,
        commission_levels,
        "investment opened"
    );

    Ok(investment)
}

pub fn investment_detail<S: LedgerStore + ?Sized>(
    store: &S,
    investment_id: &str,
    history_limit: usize,
) -> Result<InvestmentDetail, LedgerError> {
    let investment = store
        .investment(investment_id)?
        .ok_or_else(|| LedgerError::UnknownInvestment(investment_id.to_string()))?;
    Ok(InvestmentDetail {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        investment,
        history: store.history_for_investment(investment_id, history_limit)?,
    })
}

pub fn account_summary<S: LedgerStore + ?Sized>(
    store: &S,
    user_id: &str,
    history_limit: usize,
) -> Result<AccountSummary, LedgerError> {
    let user = store
        .user(user_id)?
        .ok_or_else(|| LedgerError::UnknownUser(user_id.to_string()))?;
    let recent_history = store.history_for_user(user_id, history_limit)?;

    let mut commission_by_level = BTreeMap::<u8, f64>::new();
    let mut commission_total = 0.0;
    for entry in store.commissions_for_user(user_id)? {
        *commission_by_level.entry(entry.level).or_insert(0.0) += entry.amount;
        commission_total += entry.amount;
    }

    Ok(AccountSummary {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        user,
        upline: referral::referral_chain(store, user_id, MAX_COMMISSION_DEPTH)?,
        recent_history,
        commission_total,
        commission_by_level,
        downline: referral::downline(store, user_id, MAX_COMMISSION_DEPTH)?,
    })
}
