//! Per-job exclusion gates and fire-time arithmetic.
//!
//! Each job kind owns one `JobGate`, a two-state machine (`Idle`/`Running`)
//! entered by compare-and-swap. A second trigger for the same job while it
//! runs is rejected, never queued. Gates of different jobs are independent.
//! The `JobRun` guard returns its gate to `Idle` on drop, so an unwinding
//! batch cannot leave the job wedged.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use contracts::{JobKind, JobState, JobStatus, ScheduleConfig, SchedulerStatus, SCHEMA_VERSION_V1};
use parking_lot::Mutex;
use tracing::warn;

use crate::error::LedgerError;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;

#[derive(Debug, Clone, Default)]
struct JobRecord {
    last_started_at: Option<DateTime<Utc>>,
    last_finished_at: Option<DateTime<Utc>>,
    last_processed: usize,
    last_failure_count: usize,
    last_error: Option<String>,
}

#[derive(Debug)]
pub struct JobGate {
    job: JobKind,
    state: AtomicU8,
    record: Mutex<JobRecord>,
}

impl JobGate {
    pub fn new(job: JobKind) -> Self {
        Self {
            job,
            state: AtomicU8::new(IDLE),
            record: Mutex::new(JobRecord::default()),
        }
    }

    pub fn job(&self) -> JobKind {
        self.job
    }

    pub fn state(&self) -> JobState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => JobState::Running,
            _ => JobState::Idle,
        }
    }

    /// `Idle -> Running`, or `AlreadyRunning` if the job is in flight.
    pub fn try_begin(self: &Arc<Self>, now: DateTime<Utc>) -> Result<JobRun, LedgerError> {
        if self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(job = %self.job, "trigger rejected: job already running");
            return Err(LedgerError::AlreadyRunning(self.job));
        }
        self.record.lock().last_started_at = Some(now);
        Ok(JobRun {
            gate: Arc::clone(self),
            finished: false,
        })
    }

    pub fn snapshot(&self, next_run_at: Option<DateTime<Utc>>) -> JobStatus {
        let record = self.record.lock().clone();
        JobStatus {
            job: self.job,
            state: self.state(),
            last_started_at: record.last_started_at,
            last_finished_at: record.last_finished_at,
            next_run_at,
            last_processed: record.last_processed,
            last_failure_count: record.last_failure_count,
            last_error: record.last_error,
        }
    }
}

/// Proof that the holder owns a job's `Running` state.
#[derive(Debug)]
pub struct JobRun {
    gate: Arc<JobGate>,
    finished: bool,
}

impl JobRun {
    pub fn job(&self) -> JobKind {
        self.gate.job
    }

    pub fn finish(mut self, now: DateTime<Utc>, processed: usize, failures: usize) {
        {
            let mut record = self.gate.record.lock();
            record.last_finished_at = Some(now);
            record.last_processed = processed;
            record.last_failure_count = failures;
            record.last_error = None;
        }
        self.finished = true;
    }

    pub fn abort(mut self, now: DateTime<Utc>, reason: impl Into<String>) {
        {
            let mut record = self.gate.record.lock();
            record.last_finished_at = Some(now);
            record.last_processed = 0;
            record.last_failure_count = 0;
            record.last_error = Some(reason.into());
        }
        self.finished = true;
    }
}

impl Drop for JobRun {
    fn drop(&mut self) {
        if !self.finished {
            self.gate.record.lock().last_error = Some("run ended without completing".to_string());
        }
        self.gate.state.store(IDLE, Ordering::Release);
    }
}

/// The three gates of the engine.
#[derive(Debug, Clone)]
pub struct JobBoard {
    accrual: Arc<JobGate>,
    maturity: Arc<JobGate>,
    retention: Arc<JobGate>,
}

impl JobBoard {
    pub fn new() -> Self {
        Self {
            accrual: Arc::new(JobGate::new(JobKind::DailyAccrual)),
            maturity: Arc::new(JobGate::new(JobKind::MaturitySweep)),
            retention: Arc::new(JobGate::new(JobKind::RetentionSweep)),
        }
    }

    pub fn gate(&self, job: JobKind) -> &Arc<JobGate> {
        match job {
            JobKind::DailyAccrual => &self.accrual,
            JobKind::MaturitySweep => &self.maturity,
            JobKind::RetentionSweep => &self.retention,
        }
    }

    pub fn status(&self, schedule: &ScheduleConfig, now: DateTime<Utc>) -> SchedulerStatus {
        let jobs = JobKind::ALL
            .iter()
            .map(|job| self.gate(*job).snapshot(Some(next_fire(*job, schedule, now))))
            .collect::<Vec<_>>();
        let accrual = &jobs[0];
        SchedulerStatus {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            is_running: accrual.state == JobState::Running,
            last_run: accrual.last_started_at,
            next_run: accrual.next_run_at,
            jobs,
        }
    }
}

impl Default for JobBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Next instant strictly after `now` at which `job` is due.
pub fn next_fire(job: JobKind, schedule: &ScheduleConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    match job {
        JobKind::DailyAccrual => next_daily(schedule.accrual_at, now),
        JobKind::MaturitySweep => next_daily(schedule.maturity_at, now),
        JobKind::RetentionSweep => {
            let mut candidate = next_daily(schedule.retention_at, now);
            while candidate.weekday() != schedule.retention_weekday {
                candidate += Duration::days(1);
            }
            candidate
        }
    }
}

/// Like `next_fire`, but never at or before `previous`. The wall clock read
/// after a timer wakes can still trail the instant it was aimed at.
pub fn next_fire_after(
    job: JobKind,
    schedule: &ScheduleConfig,
    now: DateTime<Utc>,
    previous: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    let base = previous.map_or(now, |previous| previous.max(now));
    next_fire(job, schedule, base)
}

fn next_daily(at: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn second_begin_is_rejected_until_the_first_run_ends() {
        let gate = Arc::new(JobGate::new(JobKind::DailyAccrual));
        let now = at(2026, 3, 1, 0, 0);

        let run = gate.try_begin(now).expect("first begin");
        assert_eq!(gate.state(), JobState::Running);
        let err = gate.try_begin(now).expect_err("second begin");
        assert_eq!(err, LedgerError::AlreadyRunning(JobKind::DailyAccrual));

        run.finish(now, 7, 1);
        assert_eq!(gate.state(), JobState::Idle);
        let snapshot = gate.snapshot(None);
        assert_eq!(snapshot.last_processed, 7);
        assert_eq!(snapshot.last_failure_count, 1);
        assert!(gate.try_begin(now).is_ok());
    }

    #[test]
    fn dropped_run_releases_gate_and_records_error() {
        let gate = Arc::new(JobGate::new(JobKind::MaturitySweep));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _run = gate.try_begin(at(2026, 3, 1, 0, 30)).expect("begin");
            panic!("batch blew up");
        }));
        assert!(result.is_err());
        assert_eq!(gate.state(), JobState::Idle);
        assert!(gate.snapshot(None).last_error.is_some());
    }

    #[test]
    fn gates_of_different_jobs_are_independent() {
        let board = JobBoard::new();
        let now = at(2026, 3, 1, 0, 0);
        let _accrual = board.gate(JobKind::DailyAccrual).try_begin(now).expect("accrual");
        assert!(board.gate(JobKind::RetentionSweep).try_begin(now).is_ok());

        let status = board.status(&ScheduleConfig::default(), now);
        assert!(status.is_running);
        assert_eq!(status.jobs.len(), 3);
    }

    #[test]
    fn next_fire_rolls_to_following_day_and_weekday() {
        let schedule = ScheduleConfig::default();
        // 2026-03-04 is a Wednesday.
        let now = at(2026, 3, 4, 0, 10);

        assert_eq!(next_fire(JobKind::DailyAccrual, &schedule, now), at(2026, 3, 5, 0, 0));
        assert_eq!(next_fire(JobKind::MaturitySweep, &schedule, now), at(2026, 3, 4, 0, 30));

        let retention = next_fire(JobKind::RetentionSweep, &schedule, now);
        assert_eq!(retention.weekday(), Weekday::Sun);
        assert_eq!(retention, at(2026, 3, 8, 2, 0));
    }

    #[test]
    fn next_fire_at_exact_boundary_moves_forward() {
        let schedule = ScheduleConfig::default();
        let now = at(2026, 3, 4, 0, 0);
        assert_eq!(next_fire(JobKind::DailyAccrual, &schedule, now), at(2026, 3, 5, 0, 0));
    }

    #[test]
    fn lagging_clock_after_a_fire_moves_to_the_following_day() {
        let schedule = ScheduleConfig::default();
        let fired = next_fire(JobKind::DailyAccrual, &schedule, at(2026, 3, 1, 12, 0));
        assert_eq!(fired, at(2026, 3, 2, 0, 0));

        let lagging_now = fired - Duration::milliseconds(3);
        assert_eq!(
            next_fire(JobKind::DailyAccrual, &schedule, lagging_now),
            fired
        );
        assert_eq!(
            next_fire_after(JobKind::DailyAccrual, &schedule, lagging_now, Some(fired)),
            at(2026, 3, 3, 0, 0)
        );
        assert_eq!(
            next_fire_after(JobKind::DailyAccrual, &schedule, lagging_now, None),
            fired
        );
    }
}
