//! Static investment tier table and deposit-time validation.

use contracts::{PlanTerms, PlanTier, ProjectedReturn};

use crate::error::LedgerError;

const PLAN_TABLE: [PlanTerms; 3] = [
    PlanTerms {
        tier: PlanTier::Tier1,
        daily_rate: 0.02,
        duration_days: 180,
        min_principal: 1_000.0,
        max_principal: 50_000.0,
    },
    PlanTerms {
        tier: PlanTier::Tier2,
        daily_rate: 0.025,
        duration_days: 200,
        min_principal: 50_000.0,
        max_principal: 200_000.0,
    },
    PlanTerms {
        tier: PlanTier::Tier3,
        daily_rate: 0.03,
        duration_days: 365,
        min_principal: 200_000.0,
        max_principal: 1_000_000.0,
    },
];

pub fn plan_of(tier: PlanTier) -> PlanTerms {
    match tier {
        PlanTier::Tier1 => PLAN_TABLE[0],
        PlanTier::Tier2 => PLAN_TABLE[1],
        PlanTier::Tier3 => PLAN_TABLE[2],
    }
}

pub fn plans() -> &'static [PlanTerms] {
    &PLAN_TABLE
}

pub fn parse_tier(label: &str) -> Result<PlanTier, LedgerError> {
    PlanTier::parse(label).ok_or_else(|| LedgerError::UnknownTier(label.to_string()))
}

pub fn validate(tier: PlanTier, amount: f64) -> Result<PlanTerms, LedgerError> {
    let terms = plan_of(tier);
    if !amount.is_finite() || amount < terms.min_principal || amount > terms.max_principal {
        return Err(LedgerError::OutOfRange {
            tier,
            amount,
            min: terms.min_principal,
            max: terms.max_principal,
        });
    }
    Ok(terms)
}

/// Label-based validation used by the deposit surface.
pub fn validate_investment_amount(tier_label: &str, amount: f64) -> Result<PlanTerms, LedgerError> {
    validate(parse_tier(tier_label)?, amount)
}

pub fn projected_return(amount: f64, tier: PlanTier) -> ProjectedReturn {
    let terms = plan_of(tier);
    let daily_return = amount * terms.daily_rate;
    let total_return = daily_return * f64::from(terms.duration_days);
    ProjectedReturn {
        tier,
        daily_rate: terms.daily_rate,
        duration_days: terms.duration_days,
        daily_return,
        total_return,
        maturity_amount: amount + total_return,
    }
}
