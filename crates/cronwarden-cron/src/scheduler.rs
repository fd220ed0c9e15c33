//! Scheduler core: owns the trigger table and runs the dispatch loop.
//!
//! [`Scheduler`] is a cheap cloneable handle. Every mutation of the trigger
//! table goes through one mutex, shared with the loop's due-check step, and
//! wakes the loop so it can recompute its deadline. Execution itself is
//! handed to a [`FireHandler`] on a spawned task, so a slow job never delays
//! anyone else's fire time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cronwarden_types::{JobId, ScheduledJob};

use crate::expression::CronError;
use crate::trigger::{ArmedTrigger, Firing, ReconcileReport, TriggerTable};

/// Receives due triggers from the dispatch loop.
#[async_trait]
pub trait FireHandler: Send + Sync {
    async fn on_fire(&self, firing: Firing);
}

struct Shared {
    table: Mutex<TriggerTable>,
    wake: Notify,
}

/// Handle to one scheduler instance.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(TriggerTable::new()),
                wake: Notify::new(),
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, TriggerTable> {
        // The table holds no invariants a panicking holder could break halfway.
        self.shared.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        self.shared.wake.notify_one();
    }

    /// Arm `job_id`, replacing any existing trigger. Invalid expressions are
    /// rejected and leave the table untouched.
    pub fn arm(&self, job_id: JobId, expression: &str) -> Result<DateTime<Utc>, CronError> {
        let next = self.table().arm(job_id, expression, Utc::now())?;
        info!(job_id, %next, "Armed trigger");
        self.wake();
        Ok(next)
    }

    /// Remove the trigger for `job_id`, if any.
    pub fn disarm(&self, job_id: JobId) -> bool {
        let removed = self.table().remove(job_id).is_some();
        if removed {
            info!(job_id, "Disarmed trigger");
            self.wake();
        }
        removed
    }

    /// Swap the trigger for a new expression in one step, due time
    /// recomputed from now. On error the old trigger stays armed.
    pub fn rearm(&self, job_id: JobId, expression: &str) -> Result<DateTime<Utc>, CronError> {
        self.arm(job_id, expression)
    }

    /// Make the trigger table match the given persisted jobs.
    pub fn reconcile(&self, jobs: &[ScheduledJob]) -> ReconcileReport {
        let report = self.table().reconcile(jobs, Utc::now());
        for (job_id, err) in &report.rejected {
            warn!(job_id, "Not arming job: {err}");
        }
        info!(
            armed = report.armed.len(),
            unchanged = report.unchanged.len(),
            disarmed = report.disarmed.len(),
            rejected = report.rejected.len(),
            "Reconciled trigger table"
        );
        if !report.armed.is_empty() || !report.disarmed.is_empty() {
            self.wake();
        }
        report
    }

    /// Arm (if active) or disarm (if not) `job`, revertibly.
    pub fn stage_job(&self, job: &ScheduledJob) -> Result<StagedChange, CronError> {
        if job.is_active {
            self.stage_arm(job.id, &job.cron_expression)
        } else {
            Ok(self.stage_disarm(job.id))
        }
    }

    /// Arm `job_id` now; the change is undone unless committed.
    pub fn stage_arm(&self, job_id: JobId, expression: &str) -> Result<StagedChange, CronError> {
        let trigger = TriggerTable::prepare(job_id, expression, Utc::now())?;
        let next = trigger.next_fire;
        let previous = self.table().insert(trigger);
        debug!(job_id, %next, "Staged trigger");
        self.wake();
        Ok(StagedChange::new(self.clone(), job_id, previous))
    }

    /// Disarm `job_id` now; the change is undone unless committed.
    pub fn stage_disarm(&self, job_id: JobId) -> StagedChange {
        let previous = self.table().remove(job_id);
        if previous.is_some() {
            debug!(job_id, "Staged disarm");
            self.wake();
        }
        StagedChange::new(self.clone(), job_id, previous)
    }

    pub fn next_fire(&self, job_id: JobId) -> Option<DateTime<Utc>> {
        self.table().get(job_id).map(|t| t.next_fire)
    }

    pub fn is_armed(&self, job_id: JobId) -> bool {
        self.table().get(job_id).is_some()
    }

    pub fn armed_count(&self) -> usize {
        self.table().len()
    }

    /// Armed triggers, soonest first.
    pub fn triggers(&self) -> Vec<ArmedTrigger> {
        self.table().snapshot()
    }

    /// Run the dispatch loop until `cancel` fires.
    ///
    /// Reconcile before calling this so that no active job is missing from
    /// the table when the first deadline is computed.
    pub async fn run(&self, handler: Arc<dyn FireHandler>, cancel: CancellationToken) {
        info!(armed = self.armed_count(), "Dispatch loop started");

        loop {
            let wait = self.table().earliest().map(|at| {
                (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
            });

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Dispatch loop stopped");
                    break;
                }
                _ = self.shared.wake.notified() => continue,
                _ = sleep_or_park(wait) => {}
            }

            let due = self.table().take_due(Utc::now());
            for firing in due {
                info!(job_id = firing.job_id, fired_at = %firing.fired_at, "Trigger fired");
                let handler = handler.clone();
                tokio::spawn(async move {
                    handler.on_fire(firing).await;
                });
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn sleep_or_park(wait: Option<Duration>) {
    match wait {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

/// A trigger-table change applied ahead of a persisted write.
///
/// Dropping it without [`commit`](Self::commit) puts back whatever trigger
/// the job had before, so a rolled-back transaction leaves no trace in the
/// live schedule.
#[must_use = "an uncommitted change is reverted on drop"]
pub struct StagedChange {
    scheduler: Scheduler,
    job_id: JobId,
    previous: Option<ArmedTrigger>,
    settled: bool,
}

impl StagedChange {
    fn new(scheduler: Scheduler, job_id: JobId, previous: Option<ArmedTrigger>) -> Self {
        Self {
            scheduler,
            job_id,
            previous,
            settled: false,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Keep the change.
    pub fn commit(mut self) {
        self.settled = true;
        info!(job_id = self.job_id, armed = self.scheduler.is_armed(self.job_id), "Trigger change committed");
    }
}

impl Drop for StagedChange {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut table = self.scheduler.table();
        table.remove(self.job_id);
        if let Some(previous) = self.previous.take() {
            table.insert(previous);
        }
        drop(table);
        warn!(job_id = self.job_id, "Reverted uncommitted trigger change");
        self.scheduler.wake();
    }
}

/// Several staged changes that commit or revert together.
///
/// Reverts run newest first, so a job staged twice ends up in its original
/// state.
#[must_use = "uncommitted changes are reverted on drop"]
#[derive(Default)]
pub struct StagedBatch {
    changes: Vec<StagedChange>,
}

impl StagedBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: StagedChange) {
        self.changes.push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn commit(mut self) {
        for change in self.changes.drain(..) {
            change.commit();
        }
    }
}

impl Drop for StagedBatch {
    fn drop(&mut self) {
        while let Some(change) = self.changes.pop() {
            drop(change);
        }
    }
}
