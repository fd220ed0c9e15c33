//! Job table access.
//!
//! The free functions take a plain `&Connection` so they work both on the
//! bare connection and inside a [`rusqlite::Transaction`].

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use cronwarden_types::{JobDraft, JobId, ScheduledJob};

use crate::{CronwardenStorage, Result, from_millis, to_millis};

const JOB_COLUMNS: &str = "id, name, command, cron_expression, created_at, last_execution, last_result, last_error, is_active";

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<ScheduledJob> {
    Ok(ScheduledJob {
        id: row.get(0)?,
        name: row.get(1)?,
        command: row.get(2)?,
        cron_expression: row.get(3)?,
        created_at: from_millis(4, row.get(4)?)?,
        last_execution: row
            .get::<_, Option<i64>>(5)?
            .map(|ms| from_millis(5, ms))
            .transpose()?,
        last_result: row.get(6)?,
        last_error: row.get(7)?,
        is_active: row.get::<_, i32>(8)? != 0,
    })
}

/// Insert a new job and return it with its assigned id.
pub fn insert(conn: &Connection, draft: &JobDraft, created_at: DateTime<Utc>) -> Result<ScheduledJob> {
    conn.execute(
        "INSERT INTO scheduled_jobs (name, command, cron_expression, created_at, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            draft.name,
            draft.command,
            draft.cron_expression,
            to_millis(created_at),
            draft.is_active as i32,
        ],
    )?;
    let id = conn.last_insert_rowid();
    Ok(get(conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?)
}

/// Fetch one job.
pub fn get(conn: &Connection, id: JobId) -> Result<Option<ScheduledJob>> {
    let job = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE id = ?1"),
            params![id],
            row_to_job,
        )
        .optional()?;
    Ok(job)
}

/// All jobs, oldest first.
pub fn list(conn: &Connection) -> Result<Vec<ScheduledJob>> {
    let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs ORDER BY id"))?;
    let jobs = stmt
        .query_map([], row_to_job)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(jobs)
}

/// Jobs with the active flag set.
pub fn list_active(conn: &Connection) -> Result<Vec<ScheduledJob>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE is_active = 1 ORDER BY id"
    ))?;
    let jobs = stmt
        .query_map([], row_to_job)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(jobs)
}

/// Overwrite the user-editable fields. Returns `None` when the job is gone.
pub fn update(conn: &Connection, id: JobId, draft: &JobDraft) -> Result<Option<ScheduledJob>> {
    let changed = conn.execute(
        "UPDATE scheduled_jobs
         SET name = ?1, command = ?2, cron_expression = ?3, is_active = ?4
         WHERE id = ?5",
        params![
            draft.name,
            draft.command,
            draft.cron_expression,
            draft.is_active as i32,
            id,
        ],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get(conn, id)
}

/// Flip the active flag. Returns `None` when the job is gone.
pub fn set_active(conn: &Connection, id: JobId, active: bool) -> Result<Option<ScheduledJob>> {
    let changed = conn.execute(
        "UPDATE scheduled_jobs SET is_active = ?1 WHERE id = ?2",
        params![active as i32, id],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get(conn, id)
}

/// Delete one job, returning the removed row.
pub fn delete(conn: &Connection, id: JobId) -> Result<Option<ScheduledJob>> {
    let Some(job) = get(conn, id)? else {
        return Ok(None);
    };
    conn.execute("DELETE FROM scheduled_jobs WHERE id = ?1", params![id])?;
    Ok(Some(job))
}

/// Delete every job, returning the removed ids.
pub fn delete_all(conn: &Connection) -> Result<Vec<JobId>> {
    let mut stmt = conn.prepare("SELECT id FROM scheduled_jobs ORDER BY id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<JobId>, _>>()?;
    conn.execute("DELETE FROM scheduled_jobs", [])?;
    Ok(ids)
}

/// Record the outcome of a run on the job row. Missing jobs are ignored.
pub fn record_last_run(
    conn: &Connection,
    id: JobId,
    at: DateTime<Utc>,
    result: &str,
    error: Option<&str>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE scheduled_jobs SET last_execution = ?1, last_result = ?2, last_error = ?3 WHERE id = ?4",
        params![to_millis(at), result, error, id],
    )?;
    Ok(changed > 0)
}

// ─── Async wrappers ───────────────────────────────────

impl CronwardenStorage {
    /// Insert a job outside of any caller-managed transaction.
    pub async fn insert_job(&self, draft: JobDraft) -> Result<ScheduledJob> {
        let now = Utc::now();
        self.with_conn(move |conn| insert(conn, &draft, now)).await
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<ScheduledJob>> {
        self.with_conn(move |conn| get(conn, id)).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<ScheduledJob>> {
        self.with_conn(|conn| list(conn)).await
    }

    pub async fn list_active_jobs(&self) -> Result<Vec<ScheduledJob>> {
        self.with_conn(|conn| list_active(conn)).await
    }

    pub async fn set_job_active(&self, id: JobId, active: bool) -> Result<Option<ScheduledJob>> {
        self.with_conn(move |conn| set_active(conn, id, active)).await
    }

    pub async fn delete_job(&self, id: JobId) -> Result<Option<ScheduledJob>> {
        self.with_conn(move |conn| delete(conn, id)).await
    }
}
