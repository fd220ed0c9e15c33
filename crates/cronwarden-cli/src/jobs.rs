use anyhow::Result;
use clap::Subcommand;

use cronwarden_cron::JobService;
use cronwarden_types::{JobDraft, JobId, ScheduledJob};

#[derive(Subcommand)]
pub enum JobCommand {
    /// Create a job
    Add {
        /// Display name
        #[arg(short, long)]
        name: String,

        /// Shell command to run
        #[arg(short, long)]
        command: String,

        /// Cron expression (5, 6 or 7 fields)
        #[arg(short = 'e', long)]
        cron: String,

        /// Create the job without arming it
        #[arg(long)]
        inactive: bool,
    },
    /// List all jobs
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one job
    Show { id: JobId },
    /// Replace a job's name, command and schedule
    Update {
        id: JobId,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long)]
        command: Option<String>,

        #[arg(short = 'e', long)]
        cron: Option<String>,
    },
    /// Activate one or more jobs
    Enable {
        #[arg(required = true)]
        ids: Vec<JobId>,
    },
    /// Deactivate one or more jobs
    Disable {
        #[arg(required = true)]
        ids: Vec<JobId>,
    },
    /// Delete a job
    Rm { id: JobId },
    /// Delete every job
    RmAll,
    /// Run a job immediately
    Run { id: JobId },
}

pub async fn run(service: &JobService, command: JobCommand) -> Result<()> {
    match command {
        JobCommand::Add {
            name,
            command,
            cron,
            inactive,
        } => {
            let mut draft = JobDraft::new(name, command, cron);
            if inactive {
                draft = draft.inactive();
            }
            let job = service.create_job(draft).await?;
            println!("Created job {}", job.id);
            print_job(&job);
        }
        JobCommand::List { json } => {
            let jobs = service.list_jobs().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("No jobs.");
            } else {
                println!("{:>5}  {:<6}  {:<20}  {:<24}  COMMAND", "ID", "ACTIVE", "NAME", "CRON");
                for job in &jobs {
                    println!(
                        "{:>5}  {:<6}  {:<20}  {:<24}  {}",
                        job.id,
                        if job.is_active { "yes" } else { "no" },
                        job.name,
                        job.cron_expression,
                        job.command
                    );
                }
            }
        }
        JobCommand::Show { id } => {
            let job = service.get_job(id).await?;
            print_job(&job);
        }
        JobCommand::Update {
            id,
            name,
            command,
            cron,
        } => {
            let current = service.get_job(id).await?;
            let draft = JobDraft {
                name: name.unwrap_or(current.name),
                command: command.unwrap_or(current.command),
                cron_expression: cron.unwrap_or(current.cron_expression),
                is_active: current.is_active,
            };
            let job = service.update_job(id, draft).await?;
            println!("Updated job {}", job.id);
            print_job(&job);
        }
        JobCommand::Enable { ids } => set_active(service, &ids, true).await?,
        JobCommand::Disable { ids } => set_active(service, &ids, false).await?,
        JobCommand::Rm { id } => {
            let job = service.delete_job(id).await?;
            println!("Deleted job {} ({})", job.id, job.name);
        }
        JobCommand::RmAll => {
            let ids = service.delete_all_jobs().await?;
            println!("Deleted {} job(s)", ids.len());
        }
        JobCommand::Run { id } => {
            let record = service.run_now(id).await?;
            println!("Status: {}", record.status);
            if !record.output.is_empty() {
                println!("--- stdout ---\n{}", record.output.trim_end());
            }
            if !record.error.is_empty() {
                println!("--- stderr ---\n{}", record.error.trim_end());
            }
        }
    }
    Ok(())
}

async fn set_active(service: &JobService, ids: &[JobId], active: bool) -> Result<()> {
    let changes: Vec<(JobId, bool)> = ids.iter().map(|&id| (id, active)).collect();
    let jobs = service.set_active_many(&changes).await?;
    let verb = if active { "Enabled" } else { "Disabled" };
    for job in jobs {
        println!("{verb} job {} ({})", job.id, job.name);
    }
    Ok(())
}

fn print_job(job: &ScheduledJob) {
    println!("  name:     {}", job.name);
    println!("  command:  {}", job.command);
    println!("  cron:     {}", job.cron_expression);
    println!("  active:   {}", job.is_active);
    println!("  created:  {}", job.created_at.to_rfc3339());
    match job.last_execution {
        Some(at) => println!(
            "  last run: {} ({})",
            at.to_rfc3339(),
            job.last_result.as_deref().unwrap_or("unknown")
        ),
        None => println!("  last run: never"),
    }
    if let Some(error) = &job.last_error {
        println!("  last error: {}", error.trim_end());
    }
}
