use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use contracts::{
    AccrualHistoryEntry, BalanceCounter, CommissionEntry, HistoryKind, Investment,
    InvestmentStatus, PlanTier, ReferralEdge, User,
};
use ledger_core::store::{
    AccrualPosting, CommissionPosting, DepositPosting, EdgeDelta, LedgerStore, MaturityPosting,
    NewCommissionEntry, NewHistoryEntry, PostingOutcome,
};
use ledger_core::StoreError;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode as SqliteErrorCode, OptionalExtension, Row};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("record not found: {0}")]
    NotFound(String),
}

impl From<PersistenceError> for StoreError {
    fn from(value: PersistenceError) -> Self {
        match value {
            PersistenceError::NotFound(what) => StoreError::NotFound(what),
            PersistenceError::Sqlite(rusqlite::Error::SqliteFailure(failure, message))
                if failure.code == SqliteErrorCode::ConstraintViolation =>
            {
                StoreError::Duplicate(message.unwrap_or_else(|| failure.to_string()))
            }
            PersistenceError::Sqlite(err @ rusqlite::Error::FromSqlConversionFailure(..)) => {
                StoreError::Read(err.to_string())
            }
            PersistenceError::Sqlite(err) => StoreError::Write(err.to_string()),
        }
    }
}

/// `LedgerStore` over a single SQLite connection. Every composite posting
/// runs in one transaction, and the connection mutex serializes writers.
#[derive(Debug)]
pub struct SqliteLedgerStore {
    conn: Mutex<Connection>,
}

impl SqliteLedgerStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    fn configure(&self) -> Result<(), PersistenceError> {
        let conn = self.conn.lock();
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&self) -> Result<(), PersistenceError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                referrer_id TEXT REFERENCES users(user_id),
                available_balance REAL NOT NULL DEFAULT 0,
                cumulative_return REAL NOT NULL DEFAULT 0,
                cumulative_commission REAL NOT NULL DEFAULT 0,
                total_investments INTEGER NOT NULL DEFAULT 0,
                active_investments INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS investments (
                investment_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(user_id),
                principal REAL NOT NULL,
                tier TEXT NOT NULL,
                daily_rate REAL NOT NULL,
                duration_days INTEGER NOT NULL,
                start_at TEXT NOT NULL,
                end_at TEXT NOT NULL,
                status TEXT NOT NULL,
                cumulative_return REAL NOT NULL DEFAULT 0,
                last_accrual_date TEXT,
                accrued_days INTEGER NOT NULL DEFAULT 0,
                maturity_amount REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS accrual_history (
                entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                investment_id TEXT NOT NULL,
                amount REAL NOT NULL,
                date TEXT NOT NULL,
                kind TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS commissions (
                entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
                beneficiary_id TEXT NOT NULL,
                originator_id TEXT NOT NULL,
                level INTEGER NOT NULL,
                percentage REAL NOT NULL,
                amount REAL NOT NULL,
                investment_id TEXT NOT NULL,
                date TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS referral_edges (
                beneficiary_id TEXT NOT NULL,
                originator_id TEXT NOT NULL,
                level INTEGER NOT NULL,
                direct_investment_volume REAL NOT NULL DEFAULT 0,
                cumulative_commission REAL NOT NULL DEFAULT 0,
                PRIMARY KEY (beneficiary_id, originator_id)
            );

            CREATE INDEX IF NOT EXISTS idx_users_referrer ON users(referrer_id);
            CREATE INDEX IF NOT EXISTS idx_investments_status ON investments(status, last_accrual_date);
            CREATE INDEX IF NOT EXISTS idx_history_user_date ON accrual_history(user_id, date);
            CREATE INDEX IF NOT EXISTS idx_history_kind_date ON accrual_history(kind, date);
            CREATE INDEX IF NOT EXISTS idx_history_investment_date ON accrual_history(investment_id, date);
            CREATE INDEX IF NOT EXISTS idx_commissions_beneficiary ON commissions(beneficiary_id);
            ",
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at)
             VALUES(1, 'initial_v1', ?1)",
            params![Utc::now().to_rfc3339()],
        )?;

        Ok(())
    }

    fn with_conn<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, PersistenceError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock();
        op(&conn).map_err(StoreError::from)
    }

    /// Runs `op` in a transaction; any error rolls the whole unit back.
    fn with_tx<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, PersistenceError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(PersistenceError::from)?;
        let out = op(&tx)?;
        tx.commit().map_err(PersistenceError::from)?;
        Ok(out)
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn insert_user(&self, user: User) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (
                    user_id,
                    username,
                    referrer_id,
                    available_balance,
                    cumulative_return,
                    cumulative_commission,
                    total_investments,
                    active_investments,
                    created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    user.user_id,
                    user.username,
                    user.referrer_id,
                    user.available_balance,
                    user.cumulative_return,
                    user.cumulative_commission,
                    user.total_investments,
                    user.active_investments,
                    user.created_at,
                ],
            )?;
            Ok(())
        })
    }

    fn user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        self.with_conn(|conn| load_user(conn, user_id))
    }

    fn referrer_of(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            let referrer: Option<Option<String>> = conn
                .query_row(
                    "SELECT referrer_id FROM users WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?;
            referrer.ok_or_else(|| PersistenceError::NotFound(format!("user {user_id}")))
        })
    }

    fn direct_referrals(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM users WHERE referrer_id = ?1 ORDER BY user_id ASC",
            )?;
            let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
            let mut children = Vec::new();
            for row in rows {
                children.push(row?);
            }
            Ok(children)
        })
    }

    fn update_user_balance(
        &self,
        user_id: &str,
        delta: f64,
        counter: BalanceCounter,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| credit_user(conn, user_id, delta, counter))
    }

    fn insert_investment(&self, investment: Investment) -> Result<(), StoreError> {
        self.with_tx(|tx| insert_investment_in(tx, &investment))
    }

    fn investment(&self, investment_id: &str) -> Result<Option<Investment>, StoreError> {
        self.with_conn(|conn| load_investment(conn, investment_id))
    }

    fn investments_due_for_accrual(&self, as_of: NaiveDate) -> Result<Vec<Investment>, StoreError> {
        self.with_conn(|conn| {
            let candidates = load_investments(
                conn,
                "WHERE status = 'ACTIVE'
                   AND (last_accrual_date IS NULL OR last_accrual_date < ?1)
                   AND accrued_days < duration_days",
                params![as_of],
            )?;
            Ok(candidates
                .into_iter()
                .filter(|investment| investment.is_due_for_accrual(as_of))
                .collect())
        })
    }

    fn investments_past_end_date(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Investment>, StoreError> {
        self.with_conn(|conn| {
            let candidates = load_investments(conn, "WHERE status = 'ACTIVE'", [])?;
            Ok(candidates
                .into_iter()
                .filter(|investment| investment.is_past_end_date(now))
                .collect())
        })
    }

    fn mark_accrued(
        &self,
        investment_id: &str,
        credit: f64,
        as_of: NaiveDate,
    ) -> Result<bool, StoreError> {
        self.with_tx(|tx| mark_accrued_in(tx, investment_id, credit, as_of))
    }

    fn mark_completed(&self, investment_id: &str) -> Result<bool, StoreError> {
        self.with_tx(|tx| mark_completed_in(tx, investment_id))
    }

    fn append_history_entry(
        &self,
        entry: NewHistoryEntry,
    ) -> Result<AccrualHistoryEntry, StoreError> {
        self.with_conn(|conn| insert_history(conn, entry))
    }

    fn append_commission_entry(
        &self,
        entry: NewCommissionEntry,
    ) -> Result<CommissionEntry, StoreError> {
        self.with_conn(|conn| insert_commission(conn, entry))
    }

    fn upsert_referral_edge(&self, delta: &EdgeDelta) -> Result<(), StoreError> {
        self.with_conn(|conn| upsert_edge(conn, delta))
    }

    fn history_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<AccrualHistoryEntry>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT entry_id, user_id, investment_id, amount, date, kind
                 FROM accrual_history
                 WHERE user_id = ?1
                 ORDER BY date DESC, entry_id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(
                params![user_id, i64::try_from(limit).unwrap_or(i64::MAX)],
                history_from_row,
            )?;
            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }
            Ok(entries)
        })
    }

    fn history_for_investment(
        &self,
        investment_id: &str,
        limit: usize,
    ) -> Result<Vec<AccrualHistoryEntry>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT entry_id, user_id, investment_id, amount, date, kind
                 FROM accrual_history
                 WHERE investment_id = ?1
                 ORDER BY date DESC, entry_id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(
                params![investment_id, i64::try_from(limit).unwrap_or(i64::MAX)],
                history_from_row,
            )?;
            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }
            Ok(entries)
        })
    }

    fn commissions_for_user(&self, user_id: &str) -> Result<Vec<CommissionEntry>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT entry_id, beneficiary_id, originator_id, level, percentage, amount,
                        investment_id, date
                 FROM commissions
                 WHERE beneficiary_id = ?1
                 ORDER BY entry_id ASC",
            )?;
            let rows = stmt.query_map(params![user_id], commission_from_row)?;
            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }
            Ok(entries)
        })
    }

    fn referral_edge(
        &self,
        beneficiary_id: &str,
        originator_id: &str,
    ) -> Result<Option<ReferralEdge>, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT beneficiary_id, originator_id, level, direct_investment_volume,
                            cumulative_commission
                     FROM referral_edges
                     WHERE beneficiary_id = ?1 AND originator_id = ?2",
                    params![beneficiary_id, originator_id],
                    |row| {
                        Ok(ReferralEdge {
                            beneficiary_id: row.get(0)?,
                            originator_id: row.get(1)?,
                            level: row.get(2)?,
                            direct_investment_volume: row.get(3)?,
                            cumulative_commission: row.get(4)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    fn delete_history_entries_older_than(
        &self,
        kind: HistoryKind,
        cutoff: NaiveDate,
    ) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM accrual_history WHERE kind = ?1 AND date < ?2",
                params![kind.as_str(), cutoff],
            )?)
        })
    }

    fn apply_accrual(&self, posting: &AccrualPosting) -> Result<PostingOutcome, StoreError> {
        self.with_tx(|tx| {
            if !mark_accrued_in(tx, &posting.investment_id, posting.credit, posting.as_of)? {
                return Ok(PostingOutcome::AlreadyApplied);
            }
            credit_user(
                tx,
                &posting.user_id,
                posting.credit,
                BalanceCounter::CumulativeReturn,
            )?;
            insert_history(
                tx,
                NewHistoryEntry {
                    user_id: posting.user_id.clone(),
                    investment_id: posting.investment_id.clone(),
                    amount: posting.credit,
                    date: posting.as_of,
                    kind: HistoryKind::DailyReturn,
                },
            )?;
            Ok(PostingOutcome::Applied)
        })
    }

    fn apply_commission(&self, posting: &CommissionPosting) -> Result<CommissionEntry, StoreError> {
        self.with_tx(|tx| {
            credit_user(
                tx,
                &posting.beneficiary_id,
                posting.amount,
                BalanceCounter::CumulativeCommission,
            )?;
            let entry = insert_commission(tx, posting.entry())?;
            upsert_edge(tx, &posting.edge_delta())?;
            Ok(entry)
        })
    }

    fn apply_deposit(&self, posting: &DepositPosting) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            insert_investment_in(tx, &posting.investment)?;
            for commission in &posting.commissions {
                credit_user(
                    tx,
                    &commission.beneficiary_id,
                    commission.amount,
                    BalanceCounter::CumulativeCommission,
                )?;
                insert_commission(tx, commission.entry())?;
                upsert_edge(tx, &commission.edge_delta())?;
            }
            Ok(())
        })
    }

    fn apply_maturity(&self, posting: &MaturityPosting) -> Result<PostingOutcome, StoreError> {
        self.with_tx(|tx| {
            if !mark_completed_in(tx, &posting.investment_id)? {
                return Ok(PostingOutcome::AlreadyApplied);
            }
            credit_user(
                tx,
                &posting.user_id,
                posting.principal,
                BalanceCounter::AvailableOnly,
            )?;
            insert_history(
                tx,
                NewHistoryEntry {
                    user_id: posting.user_id.clone(),
                    investment_id: posting.investment_id.clone(),
                    amount: posting.principal,
                    date: posting.as_of,
                    kind: HistoryKind::Maturity,
                },
            )?;
            Ok(PostingOutcome::Applied)
        })
    }
}

fn insert_investment_in(
    conn: &Connection,
    investment: &Investment,
) -> Result<(), PersistenceError> {
    let active = u32::from(investment.status == InvestmentStatus::Active);
    let changed = conn.execute(
        "UPDATE users
         SET total_investments = total_investments + 1,
             active_investments = active_investments + ?2
         WHERE user_id = ?1",
        params![investment.user_id, active],
    )?;
    if changed == 0 {
        return Err(PersistenceError::NotFound(format!(
            "user {}",
            investment.user_id
        )));
    }
    conn.execute(
        "INSERT INTO investments (
            investment_id,
            user_id,
            principal,
            tier,
            daily_rate,
            duration_days,
            start_at,
            end_at,
            status,
            cumulative_return,
            last_accrual_date,
            accrued_days,
            maturity_amount
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            investment.investment_id,
            investment.user_id,
            investment.principal,
            investment.tier.as_str(),
            investment.daily_rate,
            investment.duration_days,
            investment.start_at,
            investment.end_at,
            investment.status.as_str(),
            investment.cumulative_return,
            investment.last_accrual_date,
            investment.accrued_days,
            investment.maturity_amount,
        ],
    )?;
    Ok(())
}

fn credit_user(
    conn: &Connection,
    user_id: &str,
    delta: f64,
    counter: BalanceCounter,
) -> Result<(), PersistenceError> {
    let (return_delta, commission_delta) = match counter {
        BalanceCounter::AvailableOnly => (0.0, 0.0),
        BalanceCounter::CumulativeReturn => (delta, 0.0),
        BalanceCounter::CumulativeCommission => (0.0, delta),
    };
    let changed = conn.execute(
        "UPDATE users
         SET available_balance = available_balance + ?2,
             cumulative_return = cumulative_return + ?3,
             cumulative_commission = cumulative_commission + ?4
         WHERE user_id = ?1",
        params![user_id, delta, return_delta, commission_delta],
    )?;
    if changed == 0 {
        return Err(PersistenceError::NotFound(format!("user {user_id}")));
    }
    Ok(())
}

fn mark_accrued_in(
    conn: &Connection,
    investment_id: &str,
    credit: f64,
    as_of: NaiveDate,
) -> Result<bool, PersistenceError> {
    let investment = load_investment(conn, investment_id)?
        .ok_or_else(|| PersistenceError::NotFound(format!("investment {investment_id}")))?;
    if !investment.is_due_for_accrual(as_of) {
        debug!(%investment_id, %as_of, "accrual guard no longer holds");
        return Ok(false);
    }
    conn.execute(
        "UPDATE investments
         SET cumulative_return = cumulative_return + ?2,
             accrued_days = accrued_days + 1,
             last_accrual_date = ?3
         WHERE investment_id = ?1",
        params![investment_id, credit, as_of],
    )?;
    Ok(true)
}

fn mark_completed_in(conn: &Connection, investment_id: &str) -> Result<bool, PersistenceError> {
    let changed = conn.execute(
        "UPDATE investments SET status = 'COMPLETED'
         WHERE investment_id = ?1 AND status = 'ACTIVE'",
        params![investment_id],
    )?;
    if changed == 0 {
        if load_investment(conn, investment_id)?.is_none() {
            return Err(PersistenceError::NotFound(format!(
                "investment {investment_id}"
            )));
        }
        return Ok(false);
    }
    conn.execute(
        "UPDATE users
         SET active_investments = MAX(active_investments - 1, 0)
         WHERE user_id = (SELECT user_id FROM investments WHERE investment_id = ?1)",
        params![investment_id],
    )?;
    Ok(true)
}

fn insert_history(
    conn: &Connection,
    entry: NewHistoryEntry,
) -> Result<AccrualHistoryEntry, PersistenceError> {
    conn.execute(
        "INSERT INTO accrual_history (user_id, investment_id, amount, date, kind)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.user_id,
            entry.investment_id,
            entry.amount,
            entry.date,
            entry.kind.as_str(),
        ],
    )?;
    Ok(AccrualHistoryEntry {
        entry_id: u64::try_from(conn.last_insert_rowid()).unwrap_or(0),
        user_id: entry.user_id,
        investment_id: entry.investment_id,
        amount: entry.amount,
        date: entry.date,
        kind: entry.kind,
    })
}

fn insert_commission(
    conn: &Connection,
    entry: NewCommissionEntry,
) -> Result<CommissionEntry, PersistenceError> {
    conn.execute(
        "INSERT INTO commissions (
            beneficiary_id,
            originator_id,
            level,
            percentage,
            amount,
            investment_id,
            date
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.beneficiary_id,
            entry.originator_id,
            entry.level,
            entry.percentage,
            entry.amount,
            entry.investment_id,
            entry.date,
        ],
    )?;
    Ok(CommissionEntry {
        entry_id: u64::try_from(conn.last_insert_rowid()).unwrap_or(0),
        beneficiary_id: entry.beneficiary_id,
        originator_id: entry.originator_id,
        level: entry.level,
        percentage: entry.percentage,
        amount: entry.amount,
        investment_id: entry.investment_id,
        date: entry.date,
    })
}

fn upsert_edge(conn: &Connection, delta: &EdgeDelta) -> Result<(), PersistenceError> {
    conn.execute(
        "INSERT INTO referral_edges (
            beneficiary_id,
            originator_id,
            level,
            direct_investment_volume,
            cumulative_commission
         ) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(beneficiary_id, originator_id) DO UPDATE SET
            level = excluded.level,
            direct_investment_volume = direct_investment_volume + excluded.direct_investment_volume,
            cumulative_commission = cumulative_commission + excluded.cumulative_commission",
        params![
            delta.beneficiary_id,
            delta.originator_id,
            delta.level,
            delta.investment_volume,
            delta.commission,
        ],
    )?;
    Ok(())
}

fn load_user(conn: &Connection, user_id: &str) -> Result<Option<User>, PersistenceError> {
    Ok(conn
        .query_row(
            "SELECT user_id, username, referrer_id, available_balance, cumulative_return,
                    cumulative_commission, total_investments, active_investments, created_at
             FROM users
             WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(User {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    referrer_id: row.get(2)?,
                    available_balance: row.get(3)?,
                    cumulative_return: row.get(4)?,
                    cumulative_commission: row.get(5)?,
                    total_investments: row.get(6)?,
                    active_investments: row.get(7)?,
                    created_at: row.get(8)?,
                })
            },
        )
        .optional()?)
}

const INVESTMENT_COLUMNS: &str = "investment_id, user_id, principal, tier, daily_rate,
    duration_days, start_at, end_at, status, cumulative_return, last_accrual_date,
    accrued_days, maturity_amount";

fn load_investment(
    conn: &Connection,
    investment_id: &str,
) -> Result<Option<Investment>, PersistenceError> {
    Ok(conn
        .query_row(
            &format!("SELECT {INVESTMENT_COLUMNS} FROM investments WHERE investment_id = ?1"),
            params![investment_id],
            investment_from_row,
        )
        .optional()?)
}

fn load_investments(
    conn: &Connection,
    filter: &str,
    filter_params: impl rusqlite::Params,
) -> Result<Vec<Investment>, PersistenceError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INVESTMENT_COLUMNS} FROM investments {filter} ORDER BY investment_id ASC"
    ))?;
    let rows = stmt.query_map(filter_params, investment_from_row)?;
    let mut investments = Vec::new();
    for row in rows {
        investments.push(row?);
    }
    Ok(investments)
}

fn investment_from_row(row: &Row<'_>) -> rusqlite::Result<Investment> {
    Ok(Investment {
        investment_id: row.get(0)?,
        user_id: row.get(1)?,
        principal: row.get(2)?,
        tier: text_enum(row, 3, PlanTier::parse)?,
        daily_rate: row.get(4)?,
        duration_days: row.get(5)?,
        start_at: row.get(6)?,
        end_at: row.get(7)?,
        status: text_enum(row, 8, InvestmentStatus::parse)?,
        cumulative_return: row.get(9)?,
        last_accrual_date: row.get(10)?,
        accrued_days: row.get(11)?,
        maturity_amount: row.get(12)?,
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<AccrualHistoryEntry> {
    Ok(AccrualHistoryEntry {
        entry_id: u64::try_from(row.get::<_, i64>(0)?).unwrap_or(0),
        user_id: row.get(1)?,
        investment_id: row.get(2)?,
        amount: row.get(3)?,
        date: row.get(4)?,
        kind: text_enum(row, 5, HistoryKind::parse)?,
    })
}

fn commission_from_row(row: &Row<'_>) -> rusqlite::Result<CommissionEntry> {
    Ok(CommissionEntry {
        entry_id: u64::try_from(row.get::<_, i64>(0)?).unwrap_or(0),
        beneficiary_id: row.get(1)?,
        originator_id: row.get(2)?,
        level: row.get(3)?,
        percentage: row.get(4)?,
        amount: row.get(5)?,
        investment_id: row.get(6)?,
        date: row.get(7)?,
    })
}

fn text_enum<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unrecognized value {raw:?}").into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_db_path(label: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time")
            .as_nanos();
        std::env::temp_dir().join(format!("ledger_{label}_{nanos}.sqlite"))
    }

    fn sample_investment(owner: &str) -> Investment {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        Investment {
            investment_id: "inv_sql".to_string(),
            user_id: owner.to_string(),
            principal: 5_000.0,
            tier: PlanTier::Tier1,
            daily_rate: 0.02,
            duration_days: 180,
            start_at: start,
            end_at: start + Duration::days(180),
            status: InvestmentStatus::Active,
            cumulative_return: 0.0,
            last_accrual_date: None,
            accrued_days: 0,
            maturity_amount: 23_000.0,
        }
    }

    #[test]
    fn accrual_posting_is_guarded_and_survives_reopen() {
        let path = temp_db_path("accrual");
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        {
            let store = SqliteLedgerStore::open(&path).expect("open store");
            store
                .insert_user(User::new("u1", "one", None, created))
                .expect("insert user");
            store
                .insert_investment(sample_investment("u1"))
                .expect("insert investment");

            assert_eq!(store.investments_due_for_accrual(day).unwrap().len(), 1);
            let posting = AccrualPosting {
                investment_id: "inv_sql".to_string(),
                user_id: "u1".to_string(),
                credit: 100.0,
                as_of: day,
            };
            assert_eq!(store.apply_accrual(&posting).unwrap(), PostingOutcome::Applied);
            assert_eq!(
                store.apply_accrual(&posting).unwrap(),
                PostingOutcome::AlreadyApplied
            );
            assert!(store.investments_due_for_accrual(day).unwrap().is_empty());
        }

        let reopened = SqliteLedgerStore::open(&path).expect("reopen store");
        let investment = reopened.investment("inv_sql").unwrap().expect("investment");
        assert_eq!(investment.accrued_days, 1);
        assert_eq!(investment.last_accrual_date, Some(day));
        assert_eq!(investment.start_at, sample_investment("u1").start_at);

        let user = reopened.user("u1").unwrap().expect("user");
        assert!((user.available_balance - 100.0).abs() < 1e-9);
        assert!((user.cumulative_return - 100.0).abs() < 1e-9);
        assert_eq!(user.total_investments, 1);
        assert_eq!(user.active_investments, 1);

        let history = reopened.history_for_user("u1", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, HistoryKind::DailyReturn);

        drop(reopened);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn commission_for_unknown_beneficiary_writes_nothing() {
        let path = temp_db_path("rollback");
        let store = SqliteLedgerStore::open(&path).expect("open store");
        let posting = CommissionPosting {
            beneficiary_id: "ghost".to_string(),
            originator_id: "u2".to_string(),
            origin_user_id: "u2".to_string(),
            level: 1,
            percentage: 10.0,
            amount: 500.0,
            principal: 5_000.0,
            investment_id: "inv_x".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
        };

        let err = store.apply_commission(&posting).expect_err("unknown beneficiary");
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.commissions_for_user("ghost").unwrap().is_empty());
        assert!(store.referral_edge("ghost", "u2").unwrap().is_none());

        drop(store);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn deposit_rolls_back_when_a_commission_cannot_be_credited() {
        let path = temp_db_path("deposit");
        let store = SqliteLedgerStore::open(&path).expect("open store");
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        store
            .insert_user(User::new("u0", "zero", None, created))
            .expect("insert referrer");
        store
            .insert_user(User::new("u1", "one", Some("u0".to_string()), created))
            .expect("insert user");

        let investment = sample_investment("u1");
        let commission = |beneficiary: &str| CommissionPosting {
            beneficiary_id: beneficiary.to_string(),
            originator_id: "u1".to_string(),
            origin_user_id: "u1".to_string(),
            level: 1,
            percentage: 10.0,
            amount: 500.0,
            principal: 5_000.0,
            investment_id: investment.investment_id.clone(),
            date: investment.start_at.date_naive(),
        };

        let rejected = DepositPosting {
            investment: investment.clone(),
            commissions: vec![commission("ghost")],
        };
        let err = store.apply_deposit(&rejected).expect_err("unknown beneficiary");
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.investment("inv_sql").unwrap().is_none());
        let owner = store.user("u1").unwrap().expect("owner");
        assert_eq!(owner.total_investments, 0);
        assert_eq!(owner.active_investments, 0);

        let commissions = vec![commission("u0")];
        let accepted = DepositPosting {
            investment,
            commissions,
        };
        store.apply_deposit(&accepted).expect("deposit");
        assert!(store.investment("inv_sql").unwrap().is_some());
        assert_eq!(store.user("u1").unwrap().expect("owner").total_investments, 1);
        let referrer = store.user("u0").unwrap().expect("referrer");
        assert!((referrer.cumulative_commission - 500.0).abs() < 1e-9);
        assert_eq!(store.commissions_for_user("u0").unwrap().len(), 1);

        drop(store);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn maturity_and_retention_use_stored_dates() {
        let path = temp_db_path("maturity");
        let store = SqliteLedgerStore::open(&path).expect("open store");
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        store
            .insert_user(User::new("u1", "one", None, created))
            .expect("insert user");
        store
            .insert_investment(sample_investment("u1"))
            .expect("insert investment");

        let end_day = NaiveDate::from_ymd_opt(2026, 6, 30).unwrap();
        let sweep_before_end = Utc.with_ymd_and_hms(2026, 6, 30, 0, 30, 0).unwrap();
        let sweep_after_end = Utc.with_ymd_and_hms(2026, 7, 1, 0, 30, 0).unwrap();
        assert!(store
            .investments_past_end_date(sweep_before_end)
            .unwrap()
            .is_empty());
        assert_eq!(
            store.investments_past_end_date(sweep_after_end).unwrap().len(),
            1
        );

        let posting = MaturityPosting {
            investment_id: "inv_sql".to_string(),
            user_id: "u1".to_string(),
            principal: 5_000.0,
            as_of: end_day,
        };
        assert_eq!(store.apply_maturity(&posting).unwrap(), PostingOutcome::Applied);
        assert_eq!(
            store.apply_maturity(&posting).unwrap(),
            PostingOutcome::AlreadyApplied
        );
        let user = store.user("u1").unwrap().expect("user");
        assert_eq!(user.active_investments, 0);
        assert!((user.available_balance - 5_000.0).abs() < 1e-9);

        store
            .append_history_entry(NewHistoryEntry {
                user_id: "u1".to_string(),
                investment_id: "inv_sql".to_string(),
                amount: 100.0,
                date: end_day - Duration::days(400),
                kind: HistoryKind::DailyReturn,
            })
            .expect("old entry");
        let cutoff = end_day - Duration::days(365);
        let deleted = store
            .delete_history_entries_older_than(HistoryKind::DailyReturn, cutoff)
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.history_for_user("u1", 10).unwrap().len(), 1);

        drop(store);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn duplicate_user_maps_to_duplicate_error() {
        let path = temp_db_path("duplicate");
        let store = SqliteLedgerStore::open(&path).expect("open store");
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        store
            .insert_user(User::new("u1", "one", None, created))
            .expect("insert user");
        let err = store
            .insert_user(User::new("u1", "again", None, created))
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::Duplicate(_)));

        drop(store);
        let _ = std::fs::remove_file(&path);
    }
}
