//! Runs fired jobs and writes their execution records.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use cronwarden_storage::{CronwardenStorage, StorageError};
use cronwarden_types::{ExecutionRecord, JobId, NewExecutionRecord, ScheduledJob};

use crate::executor::JobExecutor;
use crate::scheduler::FireHandler;
use crate::trigger::Firing;

/// [`FireHandler`] that executes jobs and appends their records.
pub struct JobRunner {
    storage: Arc<CronwardenStorage>,
    executor: JobExecutor,
    retention: usize,
    in_flight: Arc<Mutex<HashSet<JobId>>>,
}

impl JobRunner {
    pub fn new(storage: Arc<CronwardenStorage>, executor: JobExecutor, retention: usize) -> Self {
        Self {
            storage,
            executor,
            retention,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn executor(&self) -> &JobExecutor {
        &self.executor
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Execute `job` and log the result, stamped with `fired_at`.
    ///
    /// The log append and the job's last-run update commit together. A job
    /// deleted while its command runs is still logged.
    pub async fn run_job(
        &self,
        job: &ScheduledJob,
        fired_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord, StorageError> {
        info!(job_id = job.id, name = %job.name, "Running job");
        let outcome = self.executor.run(&job.command).await;

        let record = NewExecutionRecord {
            job_id: job.id,
            job_name: job.name.clone(),
            timestamp: fired_at,
            output: outcome.stdout,
            error: outcome.stderr,
            status: outcome.status,
        };
        let stored = self
            .storage
            .append_execution(record, self.retention)
            .await?;

        info!(
            job_id = job.id,
            status = %stored.status,
            exit_code = ?outcome.exit_code,
            "Job finished"
        );
        Ok(stored)
    }

    fn claim(&self, job_id: JobId) -> Option<InFlight> {
        let mut running = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        running.insert(job_id).then(|| InFlight {
            set: self.in_flight.clone(),
            job_id,
        })
    }
}

#[async_trait]
impl FireHandler for JobRunner {
    /// Load the fired job and run it.
    ///
    /// A job deleted after its trigger fired but before it is loaded here is
    /// skipped with a warning and leaves no execution record, since its
    /// command is gone. Deletion once the command is running does not stop
    /// the record from being written.
    async fn on_fire(&self, firing: Firing) {
        let Some(_slot) = self.claim(firing.job_id) else {
            warn!(job_id = firing.job_id, "Previous run still in progress, skipping fire");
            return;
        };

        let job = match self.storage.get_job(firing.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = firing.job_id, "Fired job no longer exists, skipping");
                return;
            }
            Err(e) => {
                error!(job_id = firing.job_id, "Failed to load fired job: {e}");
                return;
            }
        };
        if !job.is_active {
            debug!(job_id = job.id, "Fired job is inactive, skipping");
            return;
        }

        if let Err(e) = self.run_job(&job, firing.fired_at).await {
            error!(job_id = job.id, "Failed to record execution: {e}");
        }
    }
}

/// Marks a job as running until dropped.
struct InFlight {
    set: Arc<Mutex<HashSet<JobId>>>,
    job_id: JobId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}
