//! Timer loops that fire each job at its scheduled UTC time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use contracts::JobKind;
use ledger_core::{next_fire_after, LedgerError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::LedgerService;

/// Owns the per-job timer tasks. Dropping the handle leaves them running;
/// call `stop` to shut them down.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signals every loop and waits for it to exit. A batch already in
    /// flight runs to completion first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "scheduler task ended abnormally");
            }
        }
        info!("scheduler stopped");
    }
}

pub fn spawn_scheduler(service: Arc<LedgerService>) -> SchedulerHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let tasks = JobKind::ALL
        .iter()
        .map(|job| {
            tokio::spawn(job_loop(
                Arc::clone(&service),
                *job,
                shutdown_rx.clone(),
            ))
        })
        .collect();
    info!("scheduler started");
    SchedulerHandle { shutdown, tasks }
}

async fn job_loop(service: Arc<LedgerService>, job: JobKind, mut shutdown: watch::Receiver<bool>) {
    let mut last_fire = None;
    loop {
        if *shutdown.borrow() {
            break;
        }
        let now = Utc::now();
        let fire_at = next_fire_after(job, &service.config().schedule, now, last_fire);
        let wait = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
        debug!(%job, %fire_at, "next run scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        last_fire = Some(fire_at);
        match service.dispatch(job, fire_at).await {
            Ok(_) => {}
            Err(LedgerError::AlreadyRunning(_)) => {
                warn!(%job, "scheduled run skipped: previous run still in flight");
            }
            Err(err) => error!(%job, error = %err, "scheduled run failed"),
        }
    }
    debug!(%job, "job loop exited");
}
