//! In-memory `LedgerStore` used by tests, the CLI dry runs, and embedders
//! that do not need durability. All data is lost on drop.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use contracts::{
    AccrualHistoryEntry, BalanceCounter, CommissionEntry, HistoryKind, Investment,
    InvestmentStatus, ReferralEdge, User,
};
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::store::{DepositPosting, EdgeDelta, LedgerStore, NewCommissionEntry, NewHistoryEntry};

#[derive(Debug, Default)]
struct MemoryInner {
    users: BTreeMap<String, User>,
    investments: BTreeMap<String, Investment>,
    history: Vec<AccrualHistoryEntry>,
    commissions: Vec<CommissionEntry>,
    edges: BTreeMap<(String, String), ReferralEdge>,
    next_history_id: u64,
    next_commission_id: u64,
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: Mutex<MemoryInner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full history, oldest first. Test and inspection helper.
    pub fn history(&self) -> Vec<AccrualHistoryEntry> {
        self.inner.lock().history.clone()
    }

    /// Full commission journal, oldest first.
    pub fn commissions(&self) -> Vec<CommissionEntry> {
        self.inner.lock().commissions.clone()
    }

    /// Seeds a history row with an explicit date, bypassing the processors.
    pub fn backdate_history(
        &self,
        user_id: &str,
        investment_id: &str,
        amount: f64,
        date: NaiveDate,
        kind: HistoryKind,
    ) -> AccrualHistoryEntry {
        let mut inner = self.inner.lock();
        push_history(
            &mut inner,
            NewHistoryEntry {
                user_id: user_id.to_string(),
                investment_id: investment_id.to_string(),
                amount,
                date,
                kind,
            },
        )
    }
}

fn push_history(inner: &mut MemoryInner, entry: NewHistoryEntry) -> AccrualHistoryEntry {
    inner.next_history_id += 1;
    let record = AccrualHistoryEntry {
        entry_id: inner.next_history_id,
        user_id: entry.user_id,
        investment_id: entry.investment_id,
        amount: entry.amount,
        date: entry.date,
        kind: entry.kind,
    };
    inner.history.push(record.clone());
    record
}

fn push_commission(inner: &mut MemoryInner, entry: NewCommissionEntry) -> CommissionEntry {
    inner.next_commission_id += 1;
    let record = CommissionEntry {
        entry_id: inner.next_commission_id,
        beneficiary_id: entry.beneficiary_id,
        originator_id: entry.originator_id,
        level: entry.level,
        percentage: entry.percentage,
        amount: entry.amount,
        investment_id: entry.investment_id,
        date: entry.date,
    };
    inner.commissions.push(record.clone());
    record
}

fn merge_edge(inner: &mut MemoryInner, delta: &EdgeDelta) {
    let edge = inner
        .edges
        .entry((delta.beneficiary_id.clone(), delta.originator_id.clone()))
        .or_insert_with(|| ReferralEdge {
            beneficiary_id: delta.beneficiary_id.clone(),
            originator_id: delta.originator_id.clone(),
            level: delta.level,
            direct_investment_volume: 0.0,
            cumulative_commission: 0.0,
        });
    edge.level = delta.level;
    edge.direct_investment_volume += delta.investment_volume;
    edge.cumulative_commission += delta.commission;
}

impl LedgerStore for MemoryLedger {
    fn insert_user(&self, user: User) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.users.contains_key(&user.user_id) {
            return Err(StoreError::Duplicate(format!("user {}", user.user_id)));
        }
        inner.users.insert(user.user_id.clone(), user);
        Ok(())
    }

    fn user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.lock().users.get(user_id).cloned())
    }

    fn referrer_of(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock();
        let user = inner
            .users
            .get(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        Ok(user.referrer_id.clone())
    }

    fn direct_referrals(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .users
            .values()
            .filter(|user| user.referrer_id.as_deref() == Some(user_id))
            .map(|user| user.user_id.clone())
            .collect())
    }

    fn update_user_balance(
        &self,
        user_id: &str,
        delta: f64,
        counter: BalanceCounter,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let user = inner
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        user.apply_credit(delta, counter);
        Ok(())
    }

    fn insert_investment(&self, investment: Investment) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.investments.contains_key(&investment.investment_id) {
            return Err(StoreError::Duplicate(format!(
                "investment {}",
                investment.investment_id
            )));
        }
        let owner = inner
            .users
            .get_mut(&investment.user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", investment.user_id)))?;
        owner.total_investments += 1;
        if investment.status == InvestmentStatus::Active {
            owner.active_investments += 1;
        }
        inner
            .investments
            .insert(investment.investment_id.clone(), investment);
        Ok(())
    }

    fn investment(&self, investment_id: &str) -> Result<Option<Investment>, StoreError> {
        Ok(self.inner.lock().investments.get(investment_id).cloned())
    }

    fn investments_due_for_accrual(&self, as_of: NaiveDate) -> Result<Vec<Investment>, StoreError> {
        Ok(self
            .inner
            .lock()
            .investments
            .values()
            .filter(|investment| investment.is_due_for_accrual(as_of))
            .cloned()
            .collect())
    }

    fn investments_past_end_date(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Investment>, StoreError> {
        Ok(self
            .inner
            .lock()
            .investments
            .values()
            .filter(|investment| investment.is_past_end_date(now))
            .cloned()
            .collect())
    }

    fn mark_accrued(
        &self,
        investment_id: &str,
        credit: f64,
        as_of: NaiveDate,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let investment = inner
            .investments
            .get_mut(investment_id)
            .ok_or_else(|| StoreError::NotFound(format!("investment {investment_id}")))?;
        if !investment.is_due_for_accrual(as_of) {
            return Ok(false);
        }
        investment.cumulative_return += credit;
        investment.accrued_days += 1;
        investment.last_accrual_date = Some(as_of);
        Ok(true)
    }

    fn mark_completed(&self, investment_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let investment = inner
            .investments
            .get_mut(investment_id)
            .ok_or_else(|| StoreError::NotFound(format!("investment {investment_id}")))?;
        if investment.status != InvestmentStatus::Active {
            return Ok(false);
        }
        investment.status = InvestmentStatus::Completed;
        let owner_id = investment.user_id.clone();
        if let Some(owner) = inner.users.get_mut(&owner_id) {
            owner.active_investments = owner.active_investments.saturating_sub(1);
        }
        Ok(true)
    }

    fn append_history_entry(
        &self,
        entry: NewHistoryEntry,
    ) -> Result<AccrualHistoryEntry, StoreError> {
        Ok(push_history(&mut self.inner.lock(), entry))
    }

    fn append_commission_entry(
        &self,
        entry: NewCommissionEntry,
    ) -> Result<CommissionEntry, StoreError> {
        Ok(push_commission(&mut self.inner.lock(), entry))
    }

    fn upsert_referral_edge(&self, delta: &EdgeDelta) -> Result<(), StoreError> {
        merge_edge(&mut self.inner.lock(), delta);
        Ok(())
    }

    fn history_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<AccrualHistoryEntry>, StoreError> {
        let inner = self.inner.lock();
        let mut rows = inner
            .history
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.date.cmp(&a.date).then(b.entry_id.cmp(&a.entry_id)));
        rows.truncate(limit);
        Ok(rows)
    }

    fn history_for_investment(
        &self,
        investment_id: &str,
        limit: usize,
    ) -> Result<Vec<AccrualHistoryEntry>, StoreError> {
        let inner = self.inner.lock();
        let mut rows = inner
            .history
            .iter()
            .filter(|entry| entry.investment_id == investment_id)
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.date.cmp(&a.date).then(b.entry_id.cmp(&a.entry_id)));
        rows.truncate(limit);
        Ok(rows)
    }

    fn commissions_for_user(&self, user_id: &str) -> Result<Vec<CommissionEntry>, StoreError> {
        Ok(self
            .inner
            .lock()
            .commissions
            .iter()
            .filter(|entry| entry.beneficiary_id == user_id)
            .cloned()
            .collect())
    }

    fn referral_edge(
        &self,
        beneficiary_id: &str,
        originator_id: &str,
    ) -> Result<Option<ReferralEdge>, StoreError> {
        Ok(self
            .inner
            .lock()
            .edges
            .get(&(beneficiary_id.to_string(), originator_id.to_string()))
            .cloned())
    }

    fn delete_history_entries_older_than(
        &self,
        kind: HistoryKind,
        cutoff: NaiveDate,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let before = inner.history.len();
        inner
            .history
            .retain(|entry| !(entry.kind == kind && entry.date < cutoff));
        Ok(before - inner.history.len())
    }

    /// Checks every record the deposit touches under one lock before writing,
    /// so a rejected deposit leaves no trace.
    fn apply_deposit(&self, posting: &DepositPosting) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let investment = &posting.investment;
        if inner.investments.contains_key(&investment.investment_id) {
            return Err(StoreError::Duplicate(format!(
                "investment {}",
                investment.investment_id
            )));
        }
        let missing = std::iter::once(&investment.user_id)
            .chain(posting.commissions.iter().map(|c| &c.beneficiary_id))
            .find(|user_id| !inner.users.contains_key(user_id.as_str()));
        if let Some(user_id) = missing {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }

        if let Some(owner) = inner.users.get_mut(&investment.user_id) {
            owner.total_investments += 1;
            if investment.status == InvestmentStatus::Active {
                owner.active_investments += 1;
            }
        }
        inner
            .investments
            .insert(investment.investment_id.clone(), investment.clone());
        for commission in &posting.commissions {
            if let Some(beneficiary) = inner.users.get_mut(&commission.beneficiary_id) {
                beneficiary.apply_credit(commission.amount, BalanceCounter::CumulativeCommission);
            }
            push_commission(&mut inner, commission.entry());
            merge_edge(&mut inner, &commission.edge_delta());
        }
        Ok(())
    }
}
