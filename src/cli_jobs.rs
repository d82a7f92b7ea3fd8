use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use recipe_jobs_server::config::RetrySettings;
use recipe_jobs_server::job_store::{
    EnqueueOptions, Job, JobFilter, JobKey, JobStatus, JobStore, RetryPolicy, SqliteJobStore,
};
use recipe_jobs_server::job_types::IMPORT_RECIPE;
use recipe_jobs_server::service::import_job_id;
use serde_json::json;
use std::path::PathBuf;

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

fn parse_status(s: &str) -> Result<JobStatus> {
    JobStatus::parse(s).with_context(|| {
        format!(
            "Unknown status '{}', expected pending, running, succeeded or failed",
            s
        )
    })
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the jobs database (jobs.db).
    #[clap(long, value_parser = parse_path)]
    pub db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lists jobs, most recently updated first.
    List {
        #[clap(long, value_parser = parse_status)]
        status: Option<JobStatus>,

        #[clap(long = "type")]
        job_type: Option<String>,

        #[clap(long, default_value_t = 50)]
        limit: usize,
    },

    /// Shows a single job, including its payload and last error.
    Show { job_type: String, id: String },

    /// Shows job counts per status.
    Stats,

    /// Resets a failed job to pending with a fresh attempt budget.
    Retry { job_type: String, id: String },

    /// Queues a recipe import.
    EnqueueImport { source_id: String, user_id: String },

    /// Lists the registered recurring jobs.
    Repeatables,
}

fn print_job_row(job: &Job) {
    println!(
        "{:<24} {:<36} {:<10} {:>3}/{:<3} {}",
        job.job_type,
        job.id,
        job.status.as_str(),
        job.attempts,
        job.max_attempts,
        job.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
}

fn execute(store: &dyn JobStore, command: Command) -> Result<()> {
    match command {
        Command::List {
            status,
            job_type,
            limit,
        } => {
            let jobs = store.list_jobs(&JobFilter {
                status,
                job_type,
                limit,
            })?;
            if jobs.is_empty() {
                println!("(no jobs)");
            }
            for job in &jobs {
                print_job_row(job);
            }
        }
        Command::Show { job_type, id } => {
            let key = JobKey::new(job_type, id);
            match store.get_job(&key)? {
                Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
                None => bail!("Job {} not found", key),
            }
        }
        Command::Stats => {
            let stats = store.stats()?;
            println!("pending:   {}", stats.pending);
            println!("running:   {}", stats.running);
            println!("succeeded: {}", stats.succeeded);
            println!("failed:    {}", stats.failed);
        }
        Command::Retry { job_type, id } => {
            let key = JobKey::new(job_type, id);
            if !store.retry_failed(&key)? {
                bail!("Job {} is not in the failed state", key);
            }
            println!("Job {} requeued", key);
        }
        Command::EnqueueImport { source_id, user_id } => {
            let enqueued = store.enqueue(
                IMPORT_RECIPE,
                json!({ "sourceId": source_id, "userId": user_id }),
                EnqueueOptions::with_id(import_job_id(&source_id, &user_id)),
            )?;
            println!("{} ({})", enqueued.key, enqueued.outcome.as_str());
        }
        Command::Repeatables => {
            let repeatables = store.list_repeatables()?;
            if repeatables.is_empty() {
                println!("(no recurring jobs)");
            }
            for registered in repeatables {
                println!(
                    "{:<28} {:<24} {:<16} next {}",
                    registered.spec.job_id,
                    registered.spec.job_type,
                    registered.spec.cron_expression,
                    registered.next_fire_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    if !cli_args.db.exists() {
        bail!("Jobs database not found at {:?}", cli_args.db);
    }
    // The server config is not read here; jobs queued from the CLI get the
    // default attempt budget.
    let store = SqliteJobStore::new(&cli_args.db, RetryPolicy::new(&RetrySettings::default()))?;

    execute(&store, cli_args.command)
}
