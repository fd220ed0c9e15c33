//! Job service: the operations a CRUD layer calls.
//!
//! Every write pairs the job-table change with the matching trigger change.
//! The trigger change is staged inside the SQLite transaction and settled
//! right after the commit, so a job is never left armed but unpersisted or
//! persisted but unarmed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use cronwarden_storage::{CronwardenStorage, StorageError, jobs};
use cronwarden_types::{ExecutionRecord, JobDraft, JobId, ScheduledJob};

use crate::expression::{self, CronError, CronSchedule};
use crate::runner::JobRunner;
use crate::scheduler::{Scheduler, StagedBatch};
use crate::trigger::ReconcileReport;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    InvalidCron(#[from] CronError),
    #[error("Job {0} not found")]
    NotFound(JobId),
    #[error("Invalid job: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Front door for job management.
#[derive(Clone)]
pub struct JobService {
    storage: Arc<CronwardenStorage>,
    scheduler: Scheduler,
    runner: Arc<JobRunner>,
}

impl JobService {
    pub fn new(storage: Arc<CronwardenStorage>, scheduler: Scheduler, runner: Arc<JobRunner>) -> Self {
        Self {
            storage,
            scheduler,
            runner,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn runner(&self) -> Arc<JobRunner> {
        self.runner.clone()
    }

    pub fn storage(&self) -> &Arc<CronwardenStorage> {
        &self.storage
    }

    /// Persist a new job and arm it if active.
    pub async fn create_job(&self, draft: JobDraft) -> Result<ScheduledJob, JobError> {
        validate_draft(&draft)?;
        let scheduler = self.scheduler.clone();
        let now = Utc::now();

        let job = self
            .storage
            .transaction_then(
                move |tx| -> Result<_, JobError> {
                    let job = jobs::insert(tx, &draft, now)?;
                    let staged = scheduler.stage_job(&job)?;
                    Ok((job, staged))
                },
                |(job, staged)| {
                    staged.commit();
                    job
                },
            )
            .await?;

        info!(job_id = job.id, name = %job.name, active = job.is_active, "Job created");
        Ok(job)
    }

    /// Overwrite a job's editable fields; its trigger is rearmed from now,
    /// or removed if the job is no longer active.
    pub async fn update_job(&self, id: JobId, draft: JobDraft) -> Result<ScheduledJob, JobError> {
        validate_draft(&draft)?;
        let scheduler = self.scheduler.clone();

        let job = self
            .storage
            .transaction_then(
                move |tx| -> Result<_, JobError> {
                    let job = jobs::update(tx, id, &draft)?.ok_or(JobError::NotFound(id))?;
                    let staged = scheduler.stage_job(&job)?;
                    Ok((job, staged))
                },
                |(job, staged)| {
                    staged.commit();
                    job
                },
            )
            .await?;

        info!(job_id = job.id, active = job.is_active, "Job updated");
        Ok(job)
    }

    /// Delete a job record and disarm it. Its execution history is kept.
    pub async fn delete_job(&self, id: JobId) -> Result<ScheduledJob, JobError> {
        let scheduler = self.scheduler.clone();

        let job = self
            .storage
            .transaction_then(
                move |tx| -> Result<_, JobError> {
                    let job = jobs::delete(tx, id)?.ok_or(JobError::NotFound(id))?;
                    Ok((job, scheduler.stage_disarm(id)))
                },
                |(job, staged)| {
                    staged.commit();
                    job
                },
            )
            .await?;

        info!(job_id = id, "Job deleted");
        Ok(job)
    }

    /// Delete every job and disarm all of them. Returns the removed ids.
    pub async fn delete_all_jobs(&self) -> Result<Vec<JobId>, JobError> {
        let scheduler = self.scheduler.clone();

        let ids = self
            .storage
            .transaction_then(
                move |tx| -> Result<_, JobError> {
                    let ids = jobs::delete_all(tx)?;
                    let mut batch = StagedBatch::new();
                    for &id in &ids {
                        batch.push(scheduler.stage_disarm(id));
                    }
                    Ok((ids, batch))
                },
                |(ids, batch)| {
                    batch.commit();
                    ids
                },
            )
            .await?;

        info!(count = ids.len(), "All jobs deleted");
        Ok(ids)
    }

    /// Activate or deactivate one job.
    pub async fn set_active(&self, id: JobId, active: bool) -> Result<ScheduledJob, JobError> {
        let mut jobs = self.set_active_many(&[(id, active)]).await?;
        jobs.pop().ok_or(JobError::NotFound(id))
    }

    /// Toggle several jobs in one transaction. A missing id fails the whole
    /// batch and nothing changes.
    pub async fn set_active_many(
        &self,
        changes: &[(JobId, bool)],
    ) -> Result<Vec<ScheduledJob>, JobError> {
        let changes = changes.to_vec();
        let scheduler = self.scheduler.clone();

        let updated = self
            .storage
            .transaction_then(
                move |tx| -> Result<_, JobError> {
                    let mut batch = StagedBatch::new();
                    let mut updated = Vec::with_capacity(changes.len());
                    for (id, active) in changes {
                        let job =
                            jobs::set_active(tx, id, active)?.ok_or(JobError::NotFound(id))?;
                        batch.push(scheduler.stage_job(&job)?);
                        updated.push(job);
                    }
                    Ok((updated, batch))
                },
                |(updated, batch)| {
                    batch.commit();
                    updated
                },
            )
            .await?;

        for job in &updated {
            info!(job_id = job.id, active = job.is_active, "Job activation changed");
        }
        Ok(updated)
    }

    /// Run a job immediately, outside its schedule. May overlap a scheduled
    /// run of the same job.
    pub async fn run_now(&self, id: JobId) -> Result<ExecutionRecord, JobError> {
        let job = self.get_job(id).await?;
        info!(job_id = id, "Manual run requested");
        Ok(self.runner.run_job(&job, Utc::now()).await?)
    }

    pub async fn get_job(&self, id: JobId) -> Result<ScheduledJob, JobError> {
        self.storage
            .get_job(id)
            .await?
            .ok_or(JobError::NotFound(id))
    }

    pub async fn list_jobs(&self) -> Result<Vec<ScheduledJob>, JobError> {
        Ok(self.storage.list_jobs().await?)
    }

    /// Project the persisted active set onto the trigger table.
    ///
    /// The snapshot is applied before the connection is released, so no job
    /// write can commit between the read and the table update.
    pub async fn reconcile_from_store(&self) -> Result<ReconcileReport, JobError> {
        let scheduler = self.scheduler.clone();
        self.storage
            .with_transaction(move |tx| -> Result<_, JobError> {
                let active = jobs::list_active(tx)?;
                Ok(scheduler.reconcile(&active))
            })
            .await
    }

    /// Most recent executions first.
    pub async fn executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, JobError> {
        Ok(self.storage.list_executions(limit).await?)
    }

    pub async fn clear_executions(&self) -> Result<usize, JobError> {
        let removed = self.storage.clear_executions().await?;
        info!(removed, "Execution history cleared");
        Ok(removed)
    }

    /// Check an expression and preview its next `count` fire times.
    pub fn validate(&self, expression: &str, count: usize) -> Result<Vec<DateTime<Utc>>, CronError> {
        preview(expression, Utc::now(), count)
    }
}

/// Next `count` fire times of `expression` after `after`.
pub fn preview(
    expression: &str,
    after: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>, CronError> {
    let times = CronSchedule::parse(expression)?.upcoming(after, count);
    if times.is_empty() && count > 0 {
        return Err(CronError::InvalidExpression {
            expression: expression.to_string(),
            reason: "no upcoming fire time".to_string(),
        });
    }
    Ok(times)
}

fn validate_draft(draft: &JobDraft) -> Result<(), JobError> {
    if draft.name.trim().is_empty() {
        return Err(JobError::Validation("name must not be empty".into()));
    }
    if draft.command.trim().is_empty() {
        return Err(JobError::Validation("command must not be empty".into()));
    }
    expression::validate(&draft.cron_expression)?;
    Ok(())
}
