//! Record-store contract consumed by the processors.
//!
//! Implementations only have to make each primitive atomic on its own record.
//! The composite `apply_*` units default to running their primitives in
//! sequence; a backend with transactions overrides them so that the whole
//! posting lands or none of it does.

use chrono::{DateTime, NaiveDate, Utc};
use contracts::{
    AccrualHistoryEntry, BalanceCounter, CommissionEntry, HistoryKind, Investment, ReferralEdge,
    User,
};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub user_id: String,
    pub investment_id: String,
    pub amount: f64,
    pub date: NaiveDate,
    pub kind: HistoryKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCommissionEntry {
    pub beneficiary_id: String,
    pub originator_id: String,
    pub level: u8,
    pub percentage: f64,
    pub amount: f64,
    pub investment_id: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeDelta {
    pub beneficiary_id: String,
    pub originator_id: String,
    pub level: u8,
    pub investment_volume: f64,
    pub commission: f64,
}

/// One day's return on one investment.
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualPosting {
    pub investment_id: String,
    pub user_id: String,
    pub credit: f64,
    pub as_of: NaiveDate,
}

/// One level of commission paid to one ancestor.
#[derive(Debug, Clone, PartialEq)]
pub struct CommissionPosting {
    pub beneficiary_id: String,
    pub originator_id: String,
    pub origin_user_id: String,
    pub level: u8,
    pub percentage: f64,
    pub amount: f64,
    pub principal: f64,
    pub investment_id: String,
    pub date: NaiveDate,
}

/// A new investment together with the commission paid for opening it.
#[derive(Debug, Clone, PartialEq)]
pub struct DepositPosting {
    pub investment: Investment,
    pub commissions: Vec<CommissionPosting>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaturityPosting {
    pub investment_id: String,
    pub user_id: String,
    pub principal: f64,
    pub as_of: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingOutcome {
    Applied,
    /// The guard on the investment record no longer held, e.g. another run
    /// already marked it for the day.
    AlreadyApplied,
}

pub trait LedgerStore: Send + Sync {
    fn insert_user(&self, user: User) -> Result<(), StoreError>;

    fn user(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    fn referrer_of(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    fn direct_referrals(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    fn update_user_balance(
        &self,
        user_id: &str,
        delta: f64,
        counter: BalanceCounter,
    ) -> Result<(), StoreError>;

    /// Stores a new investment and bumps the owner's investment counters.
    fn insert_investment(&self, investment: Investment) -> Result<(), StoreError>;

    fn investment(&self, investment_id: &str) -> Result<Option<Investment>, StoreError>;

    fn investments_due_for_accrual(&self, as_of: NaiveDate) -> Result<Vec<Investment>, StoreError>;

    /// Active investments whose end instant is at or before `now`.
    fn investments_past_end_date(&self, now: DateTime<Utc>)
        -> Result<Vec<Investment>, StoreError>;

    /// Check-and-set on the investment record: only when the accrual predicate
    /// still holds for `as_of`, add `credit` to the cumulative return, bump the
    /// accrued day count and set the last-accrual date. Returns `false` when
    /// the predicate no longer holds.
    fn mark_accrued(
        &self,
        investment_id: &str,
        credit: f64,
        as_of: NaiveDate,
    ) -> Result<bool, StoreError>;

    /// ACTIVE -> COMPLETED and release of the owner's active slot. Returns
    /// `false` when the investment was not active.
    fn mark_completed(&self, investment_id: &str) -> Result<bool, StoreError>;

    fn append_history_entry(&self, entry: NewHistoryEntry)
        -> Result<AccrualHistoryEntry, StoreError>;

    fn append_commission_entry(
        &self,
        entry: NewCommissionEntry,
    ) -> Result<CommissionEntry, StoreError>;

    fn upsert_referral_edge(&self, delta: &EdgeDelta) -> Result<(), StoreError>;

    /// Newest first.
    fn history_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<AccrualHistoryEntry>, StoreError>;

    /// Newest first.
    fn history_for_investment(
        &self,
        investment_id: &str,
        limit: usize,
    ) -> Result<Vec<AccrualHistoryEntry>, StoreError>;

    fn commissions_for_user(&self, user_id: &str) -> Result<Vec<CommissionEntry>, StoreError>;

    fn referral_edge(
        &self,
        beneficiary_id: &str,
        originator_id: &str,
    ) -> Result<Option<ReferralEdge>, StoreError>;

    /// Deletes entries of `kind` dated strictly before `cutoff`.
    fn delete_history_entries_older_than(
        &self,
        kind: HistoryKind,
        cutoff: NaiveDate,
    ) -> Result<usize, StoreError>;

    fn apply_accrual(&self, posting: &AccrualPosting) -> Result<PostingOutcome, StoreError> {
        if !self.mark_accrued(&posting.investment_id, posting.credit, posting.as_of)? {
            return Ok(PostingOutcome::AlreadyApplied);
        }
        self.update_user_balance(
            &posting.user_id,
            posting.credit,
            BalanceCounter::CumulativeReturn,
        )?;
        self.append_history_entry(NewHistoryEntry {
            user_id: posting.user_id.clone(),
            investment_id: posting.investment_id.clone(),
            amount: posting.credit,
            date: posting.as_of,
            kind: HistoryKind::DailyReturn,
        })?;
        Ok(PostingOutcome::Applied)
    }

    fn apply_commission(&self, posting: &CommissionPosting) -> Result<CommissionEntry, StoreError> {
        self.update_user_balance(
            &posting.beneficiary_id,
            posting.amount,
            BalanceCounter::CumulativeCommission,
        )?;
        let entry = self.append_commission_entry(posting.entry())?;
        self.upsert_referral_edge(&posting.edge_delta())?;
        Ok(entry)
    }

    fn apply_deposit(&self, posting: &DepositPosting) -> Result<(), StoreError> {
        self.insert_investment(posting.investment.clone())?;
        for commission in &posting.commissions {
            self.apply_commission(commission)?;
        }
        Ok(())
    }

    fn apply_maturity(&self, posting: &MaturityPosting) -> Result<PostingOutcome, StoreError> {
        if !self.mark_completed(&posting.investment_id)? {
            return Ok(PostingOutcome::AlreadyApplied);
        }
        self.update_user_balance(
            &posting.user_id,
            posting.principal,
            BalanceCounter::AvailableOnly,
        )?;
        self.append_history_entry(NewHistoryEntry {
            user_id: posting.user_id.clone(),
            investment_id: posting.investment_id.clone(),
            amount: posting.principal,
            date: posting.as_of,
            kind: HistoryKind::Maturity,
        })?;
        Ok(PostingOutcome::Applied)
    }
}

impl CommissionPosting {
    pub fn entry(&self) -> NewCommissionEntry {
        NewCommissionEntry {
            beneficiary_id: self.beneficiary_id.clone(),
            originator_id: self.originator_id.clone(),
            level: self.level,
            percentage: self.percentage,
            amount: self.amount,
            investment_id: self.investment_id.clone(),
            date: self.date,
        }
    }

    /// Edge stats are keyed by the investor whose principal triggered the
    /// payout, not the intermediate originator.
    pub fn edge_delta(&self) -> EdgeDelta {
        EdgeDelta {
            beneficiary_id: self.beneficiary_id.clone(),
            originator_id: self.origin_user_id.clone(),
            level: self.level,
            investment_volume: self.principal,
            commission: self.amount,
        }
    }
}
