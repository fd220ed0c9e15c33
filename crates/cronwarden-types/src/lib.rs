use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned job identifier.
pub type JobId = i64;

// ──────────────────── Job Types ────────────────────

/// A command registered to run on a cron schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledJob {
    pub id: JobId,
    /// Display name, copied into every execution record.
    pub name: String,
    /// Shell command line, executed verbatim.
    pub command: String,
    /// Cron expression (5, 6 or 7 fields).
    pub cron_expression: String,
    pub created_at: DateTime<Utc>,
    /// Fire instant of the most recent completed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution: Option<DateTime<Utc>>,
    /// Status text of the most recent run ("Success" / "Failure").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<String>,
    /// Captured stderr of the most recent run, when it wrote any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub is_active: bool,
}

/// User-supplied fields for creating or editing a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobDraft {
    pub name: String,
    pub command: String,
    pub cron_expression: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl JobDraft {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        cron_expression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            cron_expression: cron_expression.into(),
            is_active: true,
        }
    }

    /// Same draft, created inactive.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

fn default_true() -> bool {
    true
}

// ──────────────────── Execution Types ────────────────────

/// Outcome classification of one execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    Success,
    Failure,
}

impl ExecutionStatus {
    /// Classify captured stderr: any output at all counts as a failure.
    pub fn from_stderr(stderr: &str) -> Self {
        if stderr.is_empty() {
            Self::Success
        } else {
            Self::Failure
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failure => "Failure",
        }
    }
}

/// One completed execution attempt. Never mutated after it is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub id: i64,
    /// Weak reference: the job may have been deleted since.
    pub job_id: JobId,
    /// Job name at the time of execution.
    pub job_name: String,
    pub timestamp: DateTime<Utc>,
    pub output: String,
    pub error: String,
    pub status: ExecutionStatus,
}

/// An execution record before the store assigns it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExecutionRecord {
    pub job_id: JobId,
    pub job_name: String,
    pub timestamp: DateTime<Utc>,
    pub output: String,
    pub error: String,
    pub status: ExecutionStatus,
}

// ──────────────────── Login Types ────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LoginStatus {
    Success,
    Failure,
}

impl LoginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failure => "Failure",
        }
    }
}

/// A recorded login attempt. The username need not belong to an account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginAttempt {
    pub id: i64,
    pub username: String,
    pub status: LoginStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

// ──────────────────── Status parsing ────────────────────

/// Error for status text that is neither "Success" nor "Failure".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for ExecutionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Success" => Ok(Self::Success),
            "Failure" => Ok(Self::Failure),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl FromStr for LoginStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Success" => Ok(Self::Success),
            "Failure" => Ok(Self::Failure),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LoginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_stderr() {
        assert_eq!(ExecutionStatus::from_stderr(""), ExecutionStatus::Success);
        assert_eq!(
            ExecutionStatus::from_stderr("warning: deprecated flag\n"),
            ExecutionStatus::Failure
        );
        // Whitespace is still output.
        assert_eq!(ExecutionStatus::from_stderr("\n"), ExecutionStatus::Failure);
    }

    #[test]
    fn test_status_text_round_trip() {
        assert_eq!("Success".parse::<ExecutionStatus>(), Ok(ExecutionStatus::Success));
        assert_eq!("Failure".parse::<LoginStatus>(), Ok(LoginStatus::Failure));
        assert!("failure".parse::<LoginStatus>().is_err());
        assert_eq!(ExecutionStatus::Failure.to_string(), "Failure");
    }

    #[test]
    fn test_job_draft_defaults_active() {
        let json = r#"{"name":"backup","command":"tar czf /tmp/b.tgz /srv","cron_expression":"0 3 * * *"}"#;
        let draft: JobDraft = serde_json::from_str(json).unwrap();
        assert!(draft.is_active);
        assert!(!JobDraft::new("a", "b", "c").inactive().is_active);
    }

    #[test]
    fn test_scheduled_job_serde_skips_empty_last_run() {
        let job = ScheduledJob {
            id: 7,
            name: "report".into(),
            command: "echo ok".into(),
            cron_expression: "0 * * * * ?".into(),
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            last_execution: None,
            last_result: None,
            last_error: None,
            is_active: true,
        };
        let json = serde_json::to_string(&job).unwrap();
        assert!(!json.contains("last_execution"));
        let parsed: ScheduledJob = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, job);
    }
}
