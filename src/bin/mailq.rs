//! mailq CLI — operator interface to the email dispatch service.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use mailq::config::Config;
use mailq::db::Db;
use mailq::mail::{Branding, SmtpMailer};
use mailq::model::{JobId, NewJob, Status};
use mailq::telemetry::init_tracing;
use mailq::worker::{DispatchConfig, Dispatcher};

#[derive(Parser)]
#[command(name = "mailq", about = "Durable email job queue and dispatch worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatch worker daemon
    Serve {
        /// Concurrent processing slots
        #[arg(long, default_value_t = 5)]
        concurrency: usize,
        /// Visibility timeout for claims, in seconds
        #[arg(long, default_value_t = 60)]
        visibility_timeout: u64,
        /// Days to retain completed/failed jobs (0 disables purging)
        #[arg(long, default_value_t = 30)]
        retention_days: u64,
    },
    /// Job operations
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
}

#[derive(Subcommand)]
enum JobAction {
    /// Enqueue a new job
    Submit {
        /// Job type (e.g. "send-welcome-email")
        job_type: String,
        /// JSON payload
        payload: String,
        /// Override the retry budget
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Delay before the job becomes claimable, in seconds
        #[arg(long)]
        delay: Option<u64>,
    },
    /// List jobs
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Filter by job type
        #[arg(long = "type")]
        job_type: Option<String>,
        /// Maximum jobs to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a job
    Show {
        /// Job ID (full UUID or prefix)
        id: String,
    },
    /// Job counts per status
    Stats,
    /// Delete terminal jobs older than the cutoff
    Purge {
        /// Age cutoff in hours
        #[arg(long, default_value_t = 720)]
        older_than_hours: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            concurrency,
            visibility_timeout,
            retention_days,
        } => cmd_serve(concurrency, visibility_timeout, retention_days).await,
        Command::Job { action } => {
            let config = Config::from_env()?;
            let db = Db::connect(&config.database_url).await?;
            db.migrate().await?;

            match action {
                JobAction::Submit {
                    job_type,
                    payload,
                    max_attempts,
                    delay,
                } => cmd_job_submit(&db, job_type, payload, max_attempts, delay).await,
                JobAction::List {
                    status,
                    job_type,
                    limit,
                } => cmd_job_list(&db, status, job_type, limit).await,
                JobAction::Show { id } => cmd_job_show(&db, id).await,
                JobAction::Stats => cmd_job_stats(&db).await,
                JobAction::Purge { older_than_hours } => {
                    let purged = db
                        .purge_finished(Duration::from_secs(older_than_hours * 3600))
                        .await?;
                    println!("Purged {purged} job(s)");
                    Ok(())
                }
            }
        }
    }
}

async fn cmd_serve(
    concurrency: usize,
    visibility_timeout: u64,
    retention_days: u64,
) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log_level)?;

    let db = Db::connect(&config.database_url).await?;
    db.migrate().await?;
    db.health_check().await?;

    let mailer = SmtpMailer::from_config(&config.smtp)?;
    let branding = Branding::new(config.frontend_url.as_str());

    let dispatch_config = DispatchConfig {
        concurrency,
        visibility_timeout: Duration::from_secs(visibility_timeout),
        retention: (retention_days > 0)
            .then(|| Duration::from_secs(retention_days * 24 * 60 * 60)),
        ..DispatchConfig::default()
    };

    let dispatcher = Dispatcher::new(
        Arc::new(db),
        Arc::new(mailer),
        branding,
        dispatch_config,
    );

    let handle = dispatcher.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        handle.shutdown();
    });

    dispatcher.run().await?;
    Ok(())
}

async fn cmd_job_submit(
    db: &Db,
    job_type: String,
    payload: String,
    max_attempts: Option<u32>,
    delay: Option<u64>,
) -> anyhow::Result<()> {
    let payload: serde_json::Value = serde_json::from_str(&payload)?;

    let mut new = NewJob::new(&job_type, payload);
    if let Some(n) = max_attempts {
        new = new.max_attempts(n);
    }
    if let Some(secs) = delay {
        new = new.delay(Duration::from_secs(secs));
    }

    let job = db.enqueue(new).await?;
    println!("Enqueued: {} (status: {})", job.id, job.status);
    Ok(())
}

async fn cmd_job_list(
    db: &Db,
    status: Option<String>,
    job_type: Option<String>,
    limit: i64,
) -> anyhow::Result<()> {
    let status_filter: Option<Status> = match status {
        Some(s) => Some(
            s.parse()
                .map_err(|_| anyhow::anyhow!("invalid status: {s}"))?,
        ),
        None => None,
    };

    let jobs = db
        .list_jobs(status_filter, job_type.as_deref(), limit)
        .await?;

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<22}  {:<10}  {:<8}  ENQUEUED",
        "ID", "TYPE", "STATUS", "ATTEMPTS"
    );
    println!("{}", "-".repeat(76));

    for job in &jobs {
        println!(
            "{:<8}  {:<22}  {:<10}  {:<8}  {}",
            job.id,
            job.job_type,
            job.status.to_string(),
            format!("{}/{}", job.attempts, job.max_attempts),
            job.enqueued_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} job(s)", jobs.len());
    Ok(())
}

async fn cmd_job_show(db: &Db, id_str: String) -> anyhow::Result<()> {
    // Support prefix matching — find the job whose ID starts with the input
    let id = if id_str.len() < 36 {
        let jobs = db.list_jobs(None, None, 1000).await?;
        let matches: Vec<_> = jobs
            .iter()
            .filter(|job| job.id.0.to_string().starts_with(&id_str))
            .collect();
        match matches.len() {
            0 => anyhow::bail!("no job matching prefix '{id_str}'"),
            1 => matches[0].id,
            n => anyhow::bail!("{n} jobs match prefix '{id_str}' — be more specific"),
        }
    } else {
        JobId(uuid::Uuid::parse_str(&id_str)?)
    };

    let job = db.get_job(id).await?;

    println!("ID:          {}", job.id.0);
    println!("Type:        {}", job.job_type);
    println!("Status:      {}", job.status);
    println!("Attempts:    {}/{}", job.attempts, job.max_attempts);
    println!("Payload:     {}", serde_json::to_string_pretty(&job.payload)?);
    println!("Enqueued:    {}", job.enqueued_at);
    println!("Updated:     {}", job.updated_at);
    println!("Not before:  {}", job.not_before);
    if let Some(ref claimant) = job.claimed_by {
        println!("Claimed by:  {claimant}");
    }
    if let Some(expires) = job.claim_expires_at {
        println!("Claim until: {expires}");
    }
    if let Some(completed) = job.completed_at {
        println!("Completed:   {completed}");
    }
    if let Some(failed) = job.failed_at {
        println!("Failed:      {failed}");
    }
    if let Some(ref err) = job.last_error {
        println!("Last error:  {err}");
    }

    Ok(())
}

async fn cmd_job_stats(db: &Db) -> anyhow::Result<()> {
    let counts = db.count_by_status().await?;

    if counts.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for (status, count) in counts {
        println!("{status:<10}  {count}");
    }
    Ok(())
}
