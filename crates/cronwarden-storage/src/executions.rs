//! Execution log sink.
//!
//! Every append runs in one transaction together with the owning job's
//! last-run update, then trims the table back to the retention cap by
//! evicting the single oldest row.

use rusqlite::{Connection, Row, params};

use cronwarden_types::{ExecutionRecord, NewExecutionRecord};

use crate::{CronwardenStorage, Result, from_millis, jobs, parse_text, to_millis, truncate_millis};

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    Ok(ExecutionRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        job_name: row.get(2)?,
        timestamp: from_millis(3, row.get(3)?)?,
        output: row.get(4)?,
        error: row.get(5)?,
        status: parse_text(6, row.get(6)?)?,
    })
}

/// Delete the oldest row once the table holds more than `cap` rows.
/// Returns the number of rows evicted (0 or 1).
fn evict_oldest_over_cap(conn: &Connection, table: &str, cap: usize) -> Result<usize> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    if count as usize <= cap {
        return Ok(0);
    }
    let evicted = conn.execute(
        &format!(
            "DELETE FROM {table} WHERE id = (
                 SELECT id FROM {table} ORDER BY timestamp ASC, id ASC LIMIT 1
             )"
        ),
        [],
    )?;
    Ok(evicted)
}

pub(crate) fn trim_to_cap(conn: &Connection, table: &str, cap: usize) -> Result<usize> {
    let evicted = evict_oldest_over_cap(conn, table, cap)?;
    if evicted > 0 {
        tracing::debug!(table, cap, "Evicted oldest log row past retention cap");
    }
    Ok(evicted)
}

/// Append one record and update the job's last-run fields.
pub fn append(conn: &Connection, record: &NewExecutionRecord, cap: usize) -> Result<ExecutionRecord> {
    conn.execute(
        "INSERT INTO job_execution_logs (job_id, job_name, timestamp, output, error, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.job_id,
            record.job_name,
            to_millis(record.timestamp),
            record.output,
            record.error,
            record.status.as_str(),
        ],
    )?;
    let id = conn.last_insert_rowid();

    let error = (!record.error.is_empty()).then_some(record.error.as_str());
    let job_present = jobs::record_last_run(
        conn,
        record.job_id,
        record.timestamp,
        record.status.as_str(),
        error,
    )?;
    if !job_present {
        tracing::debug!(job_id = record.job_id, "Logged execution for a job that no longer exists");
    }

    trim_to_cap(conn, "job_execution_logs", cap)?;

    Ok(ExecutionRecord {
        id,
        job_id: record.job_id,
        job_name: record.job_name.clone(),
        timestamp: truncate_millis(record.timestamp),
        output: record.output.clone(),
        error: record.error.clone(),
        status: record.status,
    })
}

impl CronwardenStorage {
    /// Durably store one execution record, keeping at most `cap` rows.
    pub async fn append_execution(
        &self,
        record: NewExecutionRecord,
        cap: usize,
    ) -> Result<ExecutionRecord> {
        self.with_transaction(move |tx| append(tx, &record, cap))
            .await
    }

    /// Most recent executions first.
    pub async fn list_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, job_id, job_name, timestamp, output, error, status
                 FROM job_execution_logs ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], row_to_record)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn count_executions(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM job_execution_logs", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    /// Bulk-delete the whole execution history.
    pub async fn clear_executions(&self) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM job_execution_logs", [])?))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use cronwarden_types::{ExecutionStatus, JobDraft};

    fn record(job_id: i64, ts: DateTime<Utc>, stderr: &str) -> NewExecutionRecord {
        NewExecutionRecord {
            job_id,
            job_name: "report".into(),
            timestamp: ts,
            output: "ok\n".into(),
            error: stderr.into(),
            status: ExecutionStatus::from_stderr(stderr),
        }
    }

    #[tokio::test]
    async fn test_append_updates_job_last_run() {
        let storage = CronwardenStorage::open_in_memory().unwrap();
        let job = storage
            .insert_job(JobDraft::new("report", "echo ok", "* * * * *"))
            .await
            .unwrap();
        let fired = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let stored = storage
            .append_execution(record(job.id, fired, ""), 1000)
            .await
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Success);

        let loaded = storage.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_execution, Some(fired));
        assert_eq!(loaded.last_result.as_deref(), Some("Success"));
        assert!(loaded.last_error.is_none());
    }

    #[tokio::test]
    async fn test_append_for_deleted_job_still_logged() {
        let storage = CronwardenStorage::open_in_memory().unwrap();
        let stored = storage
            .append_execution(record(77, Utc::now(), "boom"), 1000)
            .await
            .unwrap();
        assert_eq!(stored.job_id, 77);
        assert_eq!(stored.status, ExecutionStatus::Failure);
        assert_eq!(storage.count_executions().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retention_evicts_single_oldest() {
        let storage = CronwardenStorage::open_in_memory().unwrap();
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        // Insert out of timestamp order: the oldest row is not the first id.
        for i in 0..1000 {
            let ts = base + Duration::seconds(i + 10);
            storage.append_execution(record(1, ts, ""), 1000).await.unwrap();
        }
        storage.append_execution(record(1, base, ""), 1000).await.unwrap();
        // The 1001st row was itself the oldest, so it is the one evicted.
        assert_eq!(storage.count_executions().await.unwrap(), 1000);
        let oldest = storage.list_executions(1000).await.unwrap().pop().unwrap();
        assert_eq!(oldest.timestamp, base + Duration::seconds(10));

        storage
            .append_execution(record(1, base + Duration::seconds(5000), ""), 1000)
            .await
            .unwrap();
        assert_eq!(storage.count_executions().await.unwrap(), 1000);
        let oldest = storage.list_executions(1000).await.unwrap().pop().unwrap();
        assert_eq!(oldest.timestamp, base + Duration::seconds(11));
    }

    #[tokio::test]
    async fn test_retention_small_cap() {
        let storage = CronwardenStorage::open_in_memory().unwrap();
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        for i in 0..5 {
            storage
                .append_execution(record(1, base + Duration::seconds(i), ""), 3)
                .await
                .unwrap();
        }
        let rows = storage.list_executions(10).await.unwrap();
        assert_eq!(rows.len(), 3);
        // Newest first.
        assert_eq!(rows[0].timestamp, base + Duration::seconds(4));
        assert_eq!(rows[2].timestamp, base + Duration::seconds(2));
    }

    #[tokio::test]
    async fn test_clear_executions() {
        let storage = CronwardenStorage::open_in_memory().unwrap();
        for _ in 0..4 {
            storage.append_execution(record(1, Utc::now(), ""), 1000).await.unwrap();
        }
        assert_eq!(storage.clear_executions().await.unwrap(), 4);
        assert_eq!(storage.count_executions().await.unwrap(), 0);
    }
}
