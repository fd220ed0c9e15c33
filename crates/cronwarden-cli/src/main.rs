mod history;
mod jobs;
mod serve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cronwarden_config::CronwardenConfig;
use cronwarden_cron::{JobExecutor, JobRunner, JobService, Scheduler};
use cronwarden_storage::CronwardenStorage;

#[derive(Parser)]
#[command(name = "cronwarden", about = "Cron job scheduler and runner")]
struct Cli {
    /// SQLite database path (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file path (defaults to ~/.cronwarden/config.json5)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Serve,
    /// Manage scheduled jobs
    Job {
        #[command(subcommand)]
        command: jobs::JobCommand,
    },
    /// Inspect or clear the execution history
    Logs {
        #[command(subcommand)]
        command: history::LogsCommand,
    },
    /// Inspect login attempts and the login throttle
    Logins {
        #[command(subcommand)]
        command: history::LoginsCommand,
    },
    /// Check a cron expression and show its next fire times
    Validate {
        expression: String,

        /// Number of upcoming fire times to show
        #[arg(short, long, default_value_t = 5)]
        count: usize,
    },
    /// Write a default config file if none exists
    Init,
    /// Show configuration and job summary
    Status,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Validate { expression, count } => {
            match cronwarden_cron::preview(&expression, chrono::Utc::now(), count) {
                Ok(times) => {
                    println!("valid: {expression}");
                    for at in times {
                        println!("  {}", at.to_rfc3339());
                    }
                }
                Err(e) => anyhow::bail!("{e}"),
            }
        }
        Commands::Init => {
            let path = match &cli.config {
                Some(path) => path.clone(),
                None => cronwarden_config::config_file_path()?,
            };
            if path.exists() {
                println!("Config already exists at {}", path.display());
            } else {
                match &cli.config {
                    Some(path) => cronwarden_config::save_config_to(&config, path)?,
                    None => cronwarden_config::save_config(&config)?,
                }
                println!("Wrote default config to {}", path.display());
            }
        }
        command => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let db_path = match cli.db {
                    Some(path) => path,
                    None => config.database_path()?,
                };
                let service = open_service(&config, &db_path)?;
                match command {
                    Commands::Serve => serve::run_serve(config, service).await,
                    Commands::Job { command } => jobs::run(&service, command).await,
                    Commands::Logs { command } => history::run_logs(&service, command).await,
                    Commands::Logins { command } => {
                        history::run_logins(&config, &service, command).await
                    }
                    Commands::Status => status(&config, &db_path, &service).await,
                    Commands::Validate { .. } | Commands::Init => Ok(()),
                }
            })?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<CronwardenConfig> {
    let config = match path {
        Some(path) => cronwarden_config::load_config_from(path),
        None => cronwarden_config::load_config(),
    };
    config.context("Failed to load config")
}

/// Open the job store and wire the scheduler, runner and service together.
fn open_service(config: &CronwardenConfig, path: &Path) -> anyhow::Result<JobService> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let storage = Arc::new(
        CronwardenStorage::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?,
    );

    let executor = match &config.scheduler.shell {
        Some(shell) => JobExecutor::with_shell(shell.clone()),
        None => JobExecutor::new(),
    };
    let runner = Arc::new(JobRunner::new(
        storage.clone(),
        executor,
        config.scheduler.log_retention,
    ));
    Ok(JobService::new(storage, Scheduler::new(), runner))
}

async fn status(config: &CronwardenConfig, db_path: &Path, service: &JobService) -> anyhow::Result<()> {
    let jobs = service.list_jobs().await?;
    let active = jobs.iter().filter(|j| j.is_active).count();
    let executions = service.storage().count_executions().await?;

    println!("cronwarden status");
    println!("  database: {}", db_path.display());
    println!("  shell: {}", service.runner().executor().shell());
    println!("  log retention: {}", config.scheduler.log_retention);
    println!("  jobs: {} ({active} active)", jobs.len());
    println!("  executions logged: {executions}");
    match &config.anti_brute_force {
        Some(_) => println!("  login throttle: configured"),
        None => println!("  login throttle: defaults"),
    }
    Ok(())
}
