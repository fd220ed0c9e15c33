//! Job executor: runs a command through the host shell.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use cronwarden_types::ExecutionStatus;

#[cfg(windows)]
const DEFAULT_SHELL: &str = "cmd.exe";
#[cfg(not(windows))]
const DEFAULT_SHELL: &str = "sh";

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    /// Success when stderr is empty, regardless of the exit code.
    pub status: ExecutionStatus,
    /// Process exit code; `None` when the process could not be started or
    /// was killed by a signal.
    pub exit_code: Option<i32>,
}

/// Spawns `<shell> <flag> <command>` and captures both output streams.
#[derive(Debug, Clone)]
pub struct JobExecutor {
    shell: String,
    flag: &'static str,
}

impl JobExecutor {
    pub fn new() -> Self {
        Self::with_shell(DEFAULT_SHELL)
    }

    /// Use a specific shell. `cmd`-style shells get `/c`, everything else `-c`.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        let shell = shell.into();
        let flag = if is_cmd_shell(&shell) { "/c" } else { "-c" };
        Self { shell, flag }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Run `command` to completion. Never fails: a shell that cannot be
    /// spawned or awaited is reported as a Failure with the error in stderr.
    pub async fn run(&self, command: &str) -> ExecutionOutcome {
        let mut cmd = Command::new(&self.shell);
        cmd.arg(self.flag).arg(command);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        debug!(shell = %self.shell, command, "Spawning job command");

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => {
                warn!(shell = %self.shell, "Failed to run job command: {e}");
                let stderr = format!("Failed to run `{}`: {e}", self.shell);
                return ExecutionOutcome {
                    stdout: String::new(),
                    status: ExecutionStatus::from_stderr(&stderr),
                    stderr,
                    exit_code: None,
                };
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        ExecutionOutcome {
            status: ExecutionStatus::from_stderr(&stderr),
            exit_code: output.status.code(),
            stdout,
            stderr,
        }
    }
}

impl Default for JobExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn is_cmd_shell(shell: &str) -> bool {
    let name = std::path::Path::new(shell)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(shell);
    name.eq_ignore_ascii_case("cmd")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let outcome = JobExecutor::new().run("echo ok").await;
        assert_eq!(outcome.stdout, "ok\n");
        assert_eq!(outcome.stderr, "");
        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_stderr_means_failure_even_on_zero_exit() {
        let outcome = JobExecutor::new().run("echo warn >&2; exit 0").await;
        assert_eq!(outcome.status, ExecutionStatus::Failure);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stderr, "warn\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_stderr_is_success() {
        let outcome = JobExecutor::new().run("exit 3").await;
        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_missing_shell_is_failure() {
        let outcome = JobExecutor::with_shell("/definitely/not/a/shell")
            .run("echo ok")
            .await;
        assert_eq!(outcome.status, ExecutionStatus::Failure);
        assert!(outcome.stderr.contains("/definitely/not/a/shell"));
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.stdout.is_empty());
    }

    #[test]
    fn test_shell_flag() {
        assert_eq!(JobExecutor::with_shell("/bin/bash").flag, "-c");
        assert_eq!(JobExecutor::with_shell("cmd.exe").flag, "/c");
        assert_eq!(JobExecutor::with_shell("CMD").flag, "/c");
    }
}
