//! Login-attempt log.

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};

use cronwarden_types::{LoginAttempt, LoginStatus};

use crate::executions::trim_to_cap;
use crate::{CronwardenStorage, Result, from_millis, parse_text, to_millis, truncate_millis};

fn row_to_attempt(row: &Row<'_>) -> rusqlite::Result<LoginAttempt> {
    Ok(LoginAttempt {
        id: row.get(0)?,
        username: row.get(1)?,
        status: parse_text(2, row.get(2)?)?,
        timestamp: from_millis(3, row.get(3)?)?,
        origin: row.get(4)?,
    })
}

impl CronwardenStorage {
    /// Store one login attempt, keeping at most `cap` rows.
    pub async fn record_login(
        &self,
        username: &str,
        status: LoginStatus,
        timestamp: DateTime<Utc>,
        origin: Option<&str>,
        cap: usize,
    ) -> Result<LoginAttempt> {
        let username = username.to_string();
        let origin = origin.map(str::to_string);
        let timestamp = truncate_millis(timestamp);
        self.with_transaction(move |tx| {
            tx.execute(
                "INSERT INTO login_logs (username, status, timestamp, ip_address)
                 VALUES (?1, ?2, ?3, ?4)",
                params![username, status.as_str(), to_millis(timestamp), origin],
            )?;
            let id = tx.last_insert_rowid();
            trim_to_cap(tx, "login_logs", cap)?;
            Ok(LoginAttempt {
                id,
                username,
                status,
                timestamp,
                origin,
            })
        })
        .await
    }

    /// Count failed attempts for `username` strictly after `since`.
    pub async fn count_failed_logins_since(
        &self,
        username: &str,
        since: DateTime<Utc>,
    ) -> Result<u32> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM login_logs
                 WHERE username = ?1 AND status = ?2 AND timestamp > ?3",
                params![username, LoginStatus::Failure.as_str(), to_millis(since)],
                |row| row.get(0),
            )?;
            Ok(count as u32)
        })
        .await
    }

    /// Most recent attempts first.
    pub async fn list_login_attempts(&self, limit: usize) -> Result<Vec<LoginAttempt>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, status, timestamp, ip_address
                 FROM login_logs ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], row_to_attempt)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}
