//! Trigger table: the live set of armed triggers, one per active job.
//!
//! Every operation takes `now` explicitly so the table stays a plain,
//! clock-free data structure; the scheduler supplies the wall clock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use cronwarden_types::{JobId, ScheduledJob};

use crate::expression::{CronError, CronSchedule};

/// A job's live trigger.
#[derive(Debug, Clone)]
pub struct ArmedTrigger {
    pub job_id: JobId,
    pub schedule: CronSchedule,
    pub next_fire: DateTime<Utc>,
}

impl ArmedTrigger {
    pub fn expression(&self) -> &str {
        self.schedule.expression()
    }
}

/// A trigger that came due and was handed off for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Firing {
    pub job_id: JobId,
    /// The scheduled instant, not the moment the loop noticed it.
    pub fired_at: DateTime<Utc>,
}

/// Outcome of projecting the persisted active set onto the table.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub armed: Vec<JobId>,
    pub unchanged: Vec<JobId>,
    pub disarmed: Vec<JobId>,
    pub rejected: Vec<(JobId, CronError)>,
}

#[derive(Debug, Default)]
pub struct TriggerTable {
    triggers: HashMap<JobId, ArmedTrigger>,
}

impl TriggerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a trigger for `expression` due after `now`, without inserting it.
    pub fn prepare(job_id: JobId, expression: &str, now: DateTime<Utc>) -> Result<ArmedTrigger, CronError> {
        let schedule = CronSchedule::parse(expression)?;
        let next_fire = schedule.next_after(now).ok_or_else(|| CronError::InvalidExpression {
            expression: expression.to_string(),
            reason: "no upcoming fire time".to_string(),
        })?;
        Ok(ArmedTrigger {
            job_id,
            schedule,
            next_fire,
        })
    }

    /// Insert or replace a trigger, returning the one it displaced.
    pub fn insert(&mut self, trigger: ArmedTrigger) -> Option<ArmedTrigger> {
        self.triggers.insert(trigger.job_id, trigger)
    }

    /// Arm `job_id`. On error the table is left exactly as it was.
    pub fn arm(&mut self, job_id: JobId, expression: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        let trigger = Self::prepare(job_id, expression, now)?;
        let next = trigger.next_fire;
        self.insert(trigger);
        Ok(next)
    }

    pub fn remove(&mut self, job_id: JobId) -> Option<ArmedTrigger> {
        self.triggers.remove(&job_id)
    }

    pub fn get(&self, job_id: JobId) -> Option<&ArmedTrigger> {
        self.triggers.get(&job_id)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Nearest next-fire instant across all triggers.
    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.triggers.values().map(|t| t.next_fire).min()
    }

    /// All triggers ordered by next fire, then job id.
    pub fn snapshot(&self) -> Vec<ArmedTrigger> {
        let mut all: Vec<_> = self.triggers.values().cloned().collect();
        all.sort_by_key(|t| (t.next_fire, t.job_id));
        all
    }

    /// Collect every trigger due at `now` and move it to its next
    /// occurrence after `now`. Missed occurrences in between are skipped.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Firing> {
        let mut due = Vec::new();
        let mut exhausted = Vec::new();

        for trigger in self.triggers.values_mut() {
            if trigger.next_fire > now {
                continue;
            }
            due.push(Firing {
                job_id: trigger.job_id,
                fired_at: trigger.next_fire,
            });
            match trigger.schedule.next_after(now) {
                Some(next) => trigger.next_fire = next,
                None => exhausted.push(trigger.job_id),
            }
        }

        for job_id in exhausted {
            warn!(job_id, "Cron schedule has no further occurrences, disarming");
            self.triggers.remove(&job_id);
        }

        due.sort_by_key(|f| (f.fired_at, f.job_id));
        due
    }

    /// Make the table an exact projection of `jobs` filtered to active ones.
    ///
    /// A trigger whose expression is unchanged keeps its pending next fire;
    /// anything else is (re)armed from `now`. Triggers for ids outside the
    /// active set are removed, as are triggers for jobs whose stored
    /// expression no longer validates.
    pub fn reconcile(&mut self, jobs: &[ScheduledJob], now: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut wanted = HashMap::new();

        for job in jobs.iter().filter(|j| j.is_active) {
            wanted.insert(job.id, job.cron_expression.as_str());
        }

        let stale: Vec<JobId> = self
            .triggers
            .keys()
            .filter(|id| !wanted.contains_key(id))
            .copied()
            .collect();
        for job_id in stale {
            self.triggers.remove(&job_id);
            report.disarmed.push(job_id);
        }

        for (job_id, expression) in wanted {
            if self
                .triggers
                .get(&job_id)
                .is_some_and(|t| t.expression() == expression)
            {
                report.unchanged.push(job_id);
                continue;
            }
            match self.arm(job_id, expression, now) {
                Ok(_) => report.armed.push(job_id),
                Err(e) => {
                    if self.triggers.remove(&job_id).is_some() {
                        report.disarmed.push(job_id);
                    }
                    report.rejected.push((job_id, e));
                }
            }
        }

        report.armed.sort_unstable();
        report.unchanged.sort_unstable();
        report.disarmed.sort_unstable();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 7, h, m, s).unwrap()
    }

    fn job(id: JobId, expr: &str, active: bool) -> ScheduledJob {
        ScheduledJob {
            id,
            name: format!("job-{id}"),
            command: "true".into(),
            cron_expression: expr.into(),
            created_at: at(0, 0, 0),
            last_execution: None,
            last_result: None,
            last_error: None,
            is_active: active,
        }
    }

    #[test]
    fn test_arm_computes_next_fire() {
        let mut table = TriggerTable::new();
        let next = table.arm(1, "0 * * * * ?", at(10, 0, 30)).unwrap();
        assert_eq!(next, at(10, 1, 0));
        assert_eq!(table.get(1).unwrap().expression(), "0 * * * * ?");
        assert_eq!(table.earliest(), Some(at(10, 1, 0)));
    }

    #[test]
    fn test_arm_invalid_leaves_table_unchanged() {
        let mut table = TriggerTable::new();
        table.arm(1, "0 * * * * ?", at(10, 0, 0)).unwrap();

        let err = table.arm(1, "not a cron", at(10, 0, 0)).unwrap_err();
        assert!(matches!(err, CronError::InvalidExpression { .. }));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(1).unwrap().expression(), "0 * * * * ?");

        assert!(table.arm(2, "99 * * * *", at(10, 0, 0)).is_err());
        assert!(table.get(2).is_none());
    }

    #[test]
    fn test_arm_replaces_existing() {
        let mut table = TriggerTable::new();
        table.arm(1, "0 * * * * ?", at(10, 0, 0)).unwrap();
        table.arm(1, "0 0 * * * *", at(10, 0, 0)).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(1).unwrap().next_fire, at(11, 0, 0));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut table = TriggerTable::new();
        table.arm(1, "* * * * *", at(10, 0, 0)).unwrap();
        assert!(table.remove(1).is_some());
        assert!(table.remove(1).is_none());
        assert!(table.is_empty());
        assert_eq!(table.earliest(), None);
    }

    #[test]
    fn test_take_due_advances_past_now() {
        let mut table = TriggerTable::new();
        table.arm(1, "0 * * * * ?", at(10, 0, 0)).unwrap(); // 10:01
        table.arm(2, "0 0 * * * *", at(10, 0, 0)).unwrap(); // 11:00

        assert!(table.take_due(at(10, 0, 59)).is_empty());

        // Loop woke late: 10:01, 10:02 and 10:03 were all missed; one fire, no backfill.
        let fired = table.take_due(at(10, 3, 10));
        assert_eq!(fired, vec![Firing { job_id: 1, fired_at: at(10, 1, 0) }]);
        assert_eq!(table.get(1).unwrap().next_fire, at(10, 4, 0));
        assert_eq!(table.get(2).unwrap().next_fire, at(11, 0, 0));
    }

    #[test]
    fn test_take_due_orders_by_fire_time() {
        let mut table = TriggerTable::new();
        table.arm(5, "30 * * * * ?", at(10, 0, 0)).unwrap(); // 10:00:30
        table.arm(3, "10 * * * * ?", at(10, 0, 0)).unwrap(); // 10:00:10
        let fired = table.take_due(at(10, 0, 45));
        assert_eq!(fired.iter().map(|f| f.job_id).collect::<Vec<_>>(), vec![3, 5]);
        assert!(table.snapshot().iter().all(|t| t.next_fire > at(10, 0, 45)));
    }

    #[test]
    fn test_reconcile_projects_active_set() {
        let mut table = TriggerTable::new();
        // Leftover trigger for a job that is no longer active.
        table.arm(9, "* * * * *", at(10, 0, 0)).unwrap();

        let jobs = vec![job(1, "0 * * * * ?", true), job(2, "0 * * * * ?", false)];
        let report = table.reconcile(&jobs, at(10, 0, 0));

        assert_eq!(report.armed, vec![1]);
        assert_eq!(report.disarmed, vec![9]);
        assert!(report.rejected.is_empty());
        assert_eq!(table.len(), 1);
        assert!(table.get(1).is_some());
        assert!(table.get(2).is_none());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut table = TriggerTable::new();
        let jobs = vec![job(1, "0 0 * * * *", true)];
        table.reconcile(&jobs, at(10, 0, 0));

        // Second pass later the same hour keeps the pending fire untouched.
        let report = table.reconcile(&jobs, at(10, 30, 0));
        assert_eq!(report.unchanged, vec![1]);
        assert!(report.armed.is_empty());
        assert_eq!(table.get(1).unwrap().next_fire, at(11, 0, 0));

        // Changing the expression re-arms from the new `now`.
        let jobs = vec![job(1, "0 */5 * * * *", true)];
        let report = table.reconcile(&jobs, at(10, 30, 0));
        assert_eq!(report.armed, vec![1]);
        assert_eq!(table.get(1).unwrap().next_fire, at(10, 35, 0));
    }

    #[test]
    fn test_reconcile_rejects_invalid_stored_expression() {
        let mut table = TriggerTable::new();
        table.arm(1, "* * * * *", at(10, 0, 0)).unwrap();

        let jobs = vec![job(1, "garbage", true), job(2, "* * * * *", true)];
        let report = table.reconcile(&jobs, at(10, 0, 0));
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, 1);
        assert_eq!(report.disarmed, vec![1]);
        assert!(table.get(1).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_no_backfill_after_downtime() {
        let mut table = TriggerTable::new();
        let restart = at(10, 0, 0) + Duration::hours(6);
        table.reconcile(&[job(1, "0 0 * * * *", true)], restart);
        // Only the next future occurrence; nothing is owed for the six missed hours.
        assert!(table.take_due(restart).is_empty());
        assert_eq!(table.earliest(), Some(at(17, 0, 0)));
    }
}
