use std::sync::Arc;

use anyhow::Result;
use clap::{Subcommand, ValueEnum};

use cronwarden_config::CronwardenConfig;
use cronwarden_cron::JobService;
use cronwarden_guard::{LoginThrottle, OriginFailures, ThrottleLimits};
use cronwarden_types::LoginStatus;

#[derive(Subcommand)]
pub enum LogsCommand {
    /// Show recent executions, newest first
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Delete the whole execution history
    Clear,
}

#[derive(Subcommand)]
pub enum LoginsCommand {
    /// Show recent login attempts, newest first
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },
    /// Check whether a login would currently be allowed
    Check {
        username: String,

        #[arg(long)]
        origin: Option<String>,
    },
    /// Record a login attempt
    Record {
        username: String,

        #[arg(long, value_enum)]
        status: StatusArg,

        #[arg(long)]
        origin: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Success,
    Failure,
}

impl From<StatusArg> for LoginStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Success => LoginStatus::Success,
            StatusArg::Failure => LoginStatus::Failure,
        }
    }
}

pub async fn run_logs(service: &JobService, command: LogsCommand) -> Result<()> {
    match command {
        LogsCommand::List { limit, json } => {
            let records = service.executions(limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }
            if records.is_empty() {
                println!("No executions logged.");
            }
            for record in records {
                println!(
                    "{}  job {:>4} {:<20} {}",
                    record.timestamp.to_rfc3339(),
                    record.job_id,
                    record.job_name,
                    record.status
                );
                if !record.error.is_empty() {
                    println!("    stderr: {}", record.error.trim_end());
                }
            }
        }
        LogsCommand::Clear => {
            let removed = service.clear_executions().await?;
            println!("Removed {removed} execution record(s)");
        }
    }
    Ok(())
}

pub async fn run_logins(
    config: &CronwardenConfig,
    service: &JobService,
    command: LoginsCommand,
) -> Result<()> {
    let throttle = LoginThrottle::new(
        service.storage().clone(),
        Arc::new(OriginFailures::new()),
        ThrottleLimits::from_config(config.anti_brute_force.as_ref()),
        config.scheduler.log_retention,
    );

    match command {
        LoginsCommand::List { limit, json } => {
            let attempts = service.storage().list_login_attempts(limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&attempts)?);
                return Ok(());
            }
            if attempts.is_empty() {
                println!("No login attempts logged.");
            }
            for attempt in attempts {
                println!(
                    "{}  {:<20} {:<8} {}",
                    attempt.timestamp.to_rfc3339(),
                    attempt.username,
                    attempt.status,
                    attempt.origin.as_deref().unwrap_or("-")
                );
            }
        }
        LoginsCommand::Check { username, origin } => {
            // Origin counters live in memory, so only the username window
            // carries over between invocations.
            let allowed = throttle.is_allowed(&username, origin.as_deref()).await?;
            let limits = throttle.limits();
            println!(
                "{username}: {} (limits: {} per user, {} per origin)",
                if allowed { "allowed" } else { "denied" },
                limits.max_username_failures,
                limits.max_origin_failures
            );
        }
        LoginsCommand::Record {
            username,
            status,
            origin,
        } => {
            let attempt = throttle
                .record_attempt(&username, origin.as_deref(), status.into())
                .await?;
            println!("Recorded {} attempt {} for {}", attempt.status, attempt.id, attempt.username);
        }
    }
    Ok(())
}
