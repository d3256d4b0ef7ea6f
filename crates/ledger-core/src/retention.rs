use chrono::{DateTime, Duration, Utc};
use contracts::{HistoryKind, PurgeReport};
use tracing::info;

use crate::error::LedgerError;
use crate::store::LedgerStore;

/// Deletes DAILY_RETURN history dated before `now - older_than`. Maturity
/// rows and the commission journal are kept forever.
pub fn purge_old_history<S: LedgerStore + ?Sized>(
    store: &S,
    older_than: Duration,
    now: DateTime<Utc>,
) -> Result<PurgeReport, LedgerError> {
    let cutoff = (now - older_than).date_naive();
    let deleted_count = store.delete_history_entries_older_than(HistoryKind::DailyReturn, cutoff)?;
    info!(%cutoff, deleted = deleted_count, "retention sweep finished");
    Ok(PurgeReport {
        cutoff,
        deleted_count,
    })
}

pub fn retention_window(days: u32) -> Duration {
    Duration::days(i64::from(days))
}
