//! Multi-level commission distribution over the referrer chain.

use chrono::NaiveDate;
use contracts::{InvestmentStatus, LEVEL_RATES, MAX_COMMISSION_DEPTH};
use tracing::debug;

use crate::error::LedgerError;
use crate::store::{CommissionPosting, LedgerStore};

/// Rate for a 1-based level, `None` past the table.
pub fn level_rate(level: usize) -> Option<f64> {
    level.checked_sub(1).and_then(|idx| LEVEL_RATES.get(idx).copied())
}

/// Credits each ancestor of `origin_user_id`, nearest first, with the level
/// rate applied to `principal`. Returns the number of levels credited.
///
/// The walk stops at the first user without a referrer or after
/// `MAX_COMMISSION_DEPTH` levels, whichever comes first. The cap also bounds
/// the walk if the stored chain is cyclic.
pub fn distribute<S: LedgerStore + ?Sized>(
    store: &S,
    origin_user_id: &str,
    principal: f64,
    source_investment_id: &str,
    date: NaiveDate,
) -> Result<usize, LedgerError> {
    let investment = store
        .investment(source_investment_id)?
        .ok_or_else(|| LedgerError::UnknownInvestment(source_investment_id.to_string()))?;
    if investment.status != InvestmentStatus::Active {
        return Err(LedgerError::InvestmentNotActive(
            source_investment_id.to_string(),
        ));
    }

    let postings = plan_postings(store, origin_user_id, principal, source_investment_id, date)?;
    for posting in &postings {
        store.apply_commission(posting)?;
        debug!(
            beneficiary = %posting.beneficiary_id,
            originator = %posting.originator_id,
            level = posting.level,
            amount = posting.amount,
            "commission credited"
        );
    }

    Ok(postings.len())
}

/// Reads the referrer chain and prices each level without writing anything.
pub fn plan_postings<S: LedgerStore + ?Sized>(
    store: &S,
    origin_user_id: &str,
    principal: f64,
    source_investment_id: &str,
    date: NaiveDate,
) -> Result<Vec<CommissionPosting>, LedgerError> {
    let mut postings = Vec::new();
    let mut current = origin_user_id.to_string();
    for level in 1..=MAX_COMMISSION_DEPTH {
        let Some(referrer) = store.referrer_of(&current)? else {
            break;
        };
        let Some(rate) = level_rate(level) else {
            break;
        };

        postings.push(CommissionPosting {
            beneficiary_id: referrer.clone(),
            originator_id: current.clone(),
            origin_user_id: origin_user_id.to_string(),
            level: level as u8,
            percentage: rate * 100.0,
            amount: principal * rate,
            principal,
            investment_id: source_investment_id.to_string(),
            date,
        });
        current = referrer;
    }
    Ok(postings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLedger;
    use chrono::{TimeZone, Utc};
    use contracts::{Investment, PlanTier, User};

    fn seed_chain(store: &MemoryLedger, ids: &[&str]) {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut parent: Option<String> = None;
        for id in ids {
            store
                .insert_user(User::new(*id, *id, parent.clone(), now))
                .expect("insert user");
            parent = Some(id.to_string());
        }
    }

    fn seed_investment(store: &MemoryLedger, owner: &str, status: InvestmentStatus) {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        store
            .insert_investment(Investment {
                investment_id: "inv_1".to_string(),
                user_id: owner.to_string(),
                principal: 1_000.0,
                tier: PlanTier::Tier1,
                daily_rate: 0.02,
                duration_days: 180,
                start_at: start,
                end_at: start + chrono::Duration::days(180),
                status,
                cumulative_return: 0.0,
                last_accrual_date: None,
                accrued_days: 0,
                maturity_amount: 4_600.0,
            })
            .expect("insert investment");
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 2).unwrap()
    }

    #[test]
    fn level_table_decays_and_ends_at_five() {
        assert_eq!(level_rate(1), Some(0.10));
        assert_eq!(level_rate(5), Some(0.01));
        assert_eq!(level_rate(0), None);
        assert_eq!(level_rate(6), None);
    }

    #[test]
    fn root_investor_credits_nobody() {
        let store = MemoryLedger::new();
        seed_chain(&store, &["root"]);
        seed_investment(&store, "root", InvestmentStatus::Active);

        let levels = distribute(&store, "root", 1_000.0, "inv_1", day()).expect("distribute");
        assert_eq!(levels, 0);
        assert!(store.commissions().is_empty());
    }

    #[test]
    fn chain_deeper_than_five_stops_at_level_five() {
        let store = MemoryLedger::new();
        seed_chain(&store, &["u0", "u1", "u2", "u3", "u4", "u5", "u6", "u7"]);
        seed_investment(&store, "u7", InvestmentStatus::Active);

        let levels = distribute(&store, "u7", 1_000.0, "inv_1", day()).expect("distribute");
        assert_eq!(levels, 5);

        let u1 = store.user("u1").unwrap().unwrap();
        assert_eq!(u1.cumulative_commission, 0.0);
        let u2 = store.user("u2").unwrap().unwrap();
        assert!((u2.cumulative_commission - 10.0).abs() < 1e-9);
        let u6 = store.user("u6").unwrap().unwrap();
        assert!((u6.cumulative_commission - 100.0).abs() < 1e-9);

        let entries = store.commissions();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].originator_id, "u7");
        assert_eq!(entries[1].originator_id, "u6");
        assert_eq!(entries[0].percentage, 10.0);
    }

    #[test]
    fn edge_stats_are_keyed_by_origin_investor() {
        let store = MemoryLedger::new();
        seed_chain(&store, &["a", "b", "c"]);
        seed_investment(&store, "c", InvestmentStatus::Active);

        distribute(&store, "c", 1_000.0, "inv_1", day()).expect("first");
        distribute(&store, "c", 1_000.0, "inv_1", day()).expect("second");

        let edge = store.referral_edge("a", "c").unwrap().expect("edge a<-c");
        assert_eq!(edge.level, 2);
        assert!((edge.direct_investment_volume - 2_000.0).abs() < 1e-9);
        assert!((edge.cumulative_commission - 100.0).abs() < 1e-9);
        assert!(store.referral_edge("a", "b").unwrap().is_none());
    }

    #[test]
    fn completed_source_investment_is_rejected() {
        let store = MemoryLedger::new();
        seed_chain(&store, &["a", "b"]);
        seed_investment(&store, "b", InvestmentStatus::Completed);

        let err = distribute(&store, "b", 1_000.0, "inv_1", day()).expect_err("not active");
        assert_eq!(err, LedgerError::InvestmentNotActive("inv_1".to_string()));
        assert!(store.commissions().is_empty());
    }
}
