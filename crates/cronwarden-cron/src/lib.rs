//! cronwarden-cron: cron evaluation, the trigger table and job dispatch.
//!
//! [`Scheduler`] owns the live trigger table and its dispatch loop.
//! [`JobService`] is what a CRUD layer talks to: it keeps the persisted job
//! table and the trigger table in step. Fired triggers are run by
//! [`JobRunner`] through the [`JobExecutor`].

pub mod executor;
pub mod expression;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod trigger;

pub use executor::{ExecutionOutcome, JobExecutor};
pub use expression::{CronError, CronSchedule, next_fire, validate};
pub use runner::JobRunner;
pub use scheduler::{FireHandler, Scheduler, StagedBatch, StagedChange};
pub use service::{JobError, JobService, preview};
pub use trigger::{ArmedTrigger, Firing, ReconcileReport, TriggerTable};
