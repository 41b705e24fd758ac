use anyhow::Context;
use cadence_core::config::CadenceConfig;
use cadence_runner::{jobs, RunnerLifecycleManager, Services};
use cadence_tracking::stats::{self, JobStatistics};
use cadence_tracking::GuardedRun;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::info;

/// Cadence: job scheduler with execution tracking
#[derive(Parser, Debug)]
#[command(name = "cadence", version, about, long_about = None)]
struct Cli {
    /// Config file (default: $CADENCE_CONFIG, then ~/.cadence/cadence.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler in the foreground until Ctrl-C
    Run,
    /// Runner state (self-healing)
    Status,
    /// Every known job with its statistics
    Jobs,
    /// Recent executions, newest first
    History {
        /// Only this job
        #[arg(long)]
        job: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Log lines of one execution
    Logs { execution_id: String },
    /// Statistics for one job, or overall
    Stats { job: Option<String> },
    /// Per-job performance over the last N days
    Metrics {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Delete executions older than N days (default: retention.days_to_keep)
    Cleanup {
        #[arg(long)]
        days: Option<u32>,
    },
    /// Fail running executions older than N minutes (default: retention.stale_after_minutes)
    Sweep {
        #[arg(long)]
        max_age_minutes: Option<u64>,
    },
    /// Run a job now (manual trigger, forced)
    RunNow { name: String },
    /// Mark a job active
    Enable { name: String },
    /// Mark a job disabled
    Disable { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cadence=info,cadence_runner=info,cadence_scheduler=info,cadence_tracking=info"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let config_path = cli.config.or_else(|| std::env::var("CADENCE_CONFIG").ok());
    let config = CadenceConfig::load(config_path.as_deref()).context("loading configuration")?;
    let services = Services::open(&config).context("opening database")?;

    match cli.command {
        Command::Run => {
            let runner = RunnerLifecycleManager::new(config, services);
            if !runner.start()? {
                anyhow::bail!("runner is already running");
            }
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            info!("shutdown requested");
            tokio::task::spawn_blocking(move || runner.stop()).await??;
        }
        Command::Status => {
            let runner = RunnerLifecycleManager::new(config, services);
            print_json(&runner.status()?)?;
        }
        Command::Jobs => {
            let jobs = services.store.list_jobs()?;
            let jobs: Vec<JobStatistics> = jobs.iter().map(JobStatistics::from).collect();
            print_json(&jobs)?;
        }
        Command::History { job, limit } => {
            print_json(&services.store.execution_history(job.as_deref(), limit)?)?;
        }
        Command::Logs { execution_id } => {
            if services.store.execution(&execution_id)?.is_none() {
                anyhow::bail!("execution {execution_id} not found");
            }
            print_json(&services.store.execution_logs(&execution_id)?)?;
        }
        Command::Stats { job: Some(name) } => {
            let stats = stats::job_statistics(services.store.as_ref(), &name)?
                .with_context(|| format!("job {name:?} has never run"))?;
            print_json(&stats)?;
        }
        Command::Stats { job: None } => {
            let jobs = services.store.list_jobs()?;
            print_json(&json!({
                "overall": stats::overall_statistics(&jobs),
                "jobs": jobs.iter().map(JobStatistics::from).collect::<Vec<_>>(),
            }))?;
        }
        Command::Metrics { days } => {
            print_json(&stats::load_performance_metrics(services.store.as_ref(), days)?)?;
        }
        Command::Cleanup { days } => {
            let days = days.unwrap_or(config.retention.days_to_keep);
            let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(days));
            let (executions, logs) = services.store.delete_executions_before(cutoff)?;
            print_json(&json!({
                "cutoff": cutoff,
                "executions_deleted": executions,
                "logs_deleted": logs,
            }))?;
        }
        Command::Sweep { max_age_minutes } => {
            let minutes = max_age_minutes
                .unwrap_or(config.retention.stale_after_minutes)
                .min(5_256_000);
            let reaped = services
                .lock
                .sweep_stale_executions(chrono::Duration::minutes(minutes as i64))?;
            print_json(&json!({ "reaped": reaped }))?;
        }
        Command::RunNow { name } => match jobs::run_now(&services, &config, &name).await? {
            GuardedRun::Skipped(reason) => {
                print_json(&json!({ "job": name, "skipped": true, "reason": reason }))?;
            }
            GuardedRun::Completed(run) => {
                let (result, error) = match &run.result {
                    Ok(value) => (Some(value.clone()), None),
                    Err(e) => (None, Some(e.message.clone())),
                };
                print_json(&json!({
                    "job": run.job_name,
                    "execution_id": run.execution_id,
                    "status": run.status,
                    "duration_secs": run.duration_secs,
                    "result": result,
                    "error": error,
                }))?;
                if !run.succeeded() {
                    anyhow::bail!("job {name:?} failed");
                }
            }
        },
        Command::Enable { name } => set_active(&services, &name, true)?,
        Command::Disable { name } => set_active(&services, &name, false)?,
    }
    Ok(())
}

fn set_active(services: &Services, name: &str, active: bool) -> anyhow::Result<()> {
    services
        .store
        .set_job_active(name, active, chrono::Utc::now())
        .with_context(|| format!("updating job {name:?}"))?;
    let job = services.store.job(name)?;
    print_json(&job)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
