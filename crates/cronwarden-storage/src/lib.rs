//! cronwarden-storage: SQLite-based persistence for jobs and their history.
//!
//! Holds the job table, the execution log and the login-attempt log.
//! Job-table writes are exposed both as async methods and as plain
//! functions in [`jobs`] so callers can compose them inside
//! [`CronwardenStorage::with_transaction`].

pub mod executions;
pub mod jobs;
pub mod logins;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StorageError>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS scheduled_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        command TEXT NOT NULL,
        cron_expression TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        last_execution INTEGER,
        last_result TEXT,
        last_error TEXT,
        is_active INTEGER NOT NULL DEFAULT 1
    );

    CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_active
        ON scheduled_jobs(is_active);

    CREATE TABLE IF NOT EXISTS job_execution_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id INTEGER NOT NULL,
        job_name TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        output TEXT NOT NULL,
        error TEXT NOT NULL,
        status TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_job_execution_logs_timestamp
        ON job_execution_logs(timestamp);

    CREATE TABLE IF NOT EXISTS login_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL,
        status TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        ip_address TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_login_logs_username_timestamp
        ON login_logs(username, timestamp);";

/// SQLite-based storage for cronwarden.
pub struct CronwardenStorage {
    conn: Arc<Mutex<Connection>>,
}

impl CronwardenStorage {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Storage opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await?
    }

    /// Run `f` inside a single SQLite transaction.
    ///
    /// The transaction commits only when `f` returns `Ok`; any error, or a
    /// failing commit, rolls everything back. Values returned by `f` are
    /// dropped without being handed back when the commit fails.
    pub async fn with_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StorageError> + Send + 'static,
    {
        self.transaction_then(f, |value| value).await
    }

    /// Like [`with_transaction`](Self::with_transaction), but hands the
    /// value to `then` on the blocking thread right after the commit.
    ///
    /// `then` runs even if the awaiting future has been dropped, which lets
    /// callers settle in-memory state that must track the committed rows.
    pub async fn transaction_then<T, U, E, F, G>(&self, f: F, then: G) -> std::result::Result<U, E>
    where
        F: FnOnce(&Transaction<'_>) -> std::result::Result<T, E> + Send + 'static,
        G: FnOnce(T) -> U + Send + 'static,
        T: Send + 'static,
        U: Send + 'static,
        E: From<StorageError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction().map_err(StorageError::from)?;
            let value = f(&tx)?;
            tx.commit().map_err(StorageError::from)?;
            Ok(then(value))
        })
        .await
        .map_err(StorageError::from)?
    }
}

// ─── Row helpers ───────────────────────────────────────

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Drop sub-millisecond precision so values match what a read returns.
pub(crate) fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

pub(crate) fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

pub(crate) fn parse_text<T>(idx: usize, text: String) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    text.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
