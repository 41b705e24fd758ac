//! The jobs a runner schedules.
//!
//! Configured jobs are external programs; job code never runs inside the
//! scheduler process. Two maintenance jobs (retention and the stale-run
//! sweep) are added when `retention.enabled` is set. Every job is wrapped
//! by the [`JobGuard`](cadence_tracking::JobGuard) before it reaches the
//! scheduler, so overlap protection and tracking apply uniformly.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use cadence_core::config::{CadenceConfig, JobConfig};
use cadence_core::{job_fn, CoreError, JobArgs, JobError, JobFn, JobResult, TriggerSpec};
use cadence_scheduler::{ScheduledJobId, Scheduler};
use cadence_tracking::{
    current_execution, run_blocking, ExecutionLock, ExecutionStore, GuardedRun, JobDefinition,
    LogLevel,
};
use chrono::Utc;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Result, RunnerError};
use crate::service::Services;

pub const RETENTION_JOB: &str = "cadence.retention";
pub const STALE_SWEEP_JOB: &str = "cadence.stale_sweep";

/// Cap on captured stdout / stderr stored as result data.
pub const MAX_OUTPUT_CHARS: usize = 8_000;

/// A job ready to be scheduled or run by hand.
pub struct JobEntry {
    pub name: String,
    pub trigger: TriggerSpec,
    pub definition: JobDefinition,
    /// Per-job override of the lock staleness timeout.
    pub lock_timeout_minutes: Option<u64>,
    /// Unguarded body.
    pub job: JobFn,
}

/// Configured jobs followed by the maintenance jobs.
pub fn catalogue(config: &CadenceConfig, services: &Services) -> Result<Vec<JobEntry>> {
    let mut entries: Vec<JobEntry> = config.jobs.iter().map(command_entry).collect();

    if config.retention.enabled {
        entries.push(maintenance_entry(
            RETENTION_JOB,
            "Delete execution history older than the retention window",
            TriggerSpec::Daily {
                hour: 3,
                minute: 0,
                timezone: None,
            },
            retention_job(Arc::clone(&services.store), config.retention.days_to_keep),
        ));
        entries.push(maintenance_entry(
            STALE_SWEEP_JOB,
            "Fail executions left running by a crashed runner",
            TriggerSpec::Interval {
                delay_seconds: 60,
                repeat_seconds: Some(3_600),
            },
            stale_sweep_job(services.lock.clone(), config.retention.stale_after_minutes),
        ));
    }

    let mut seen = HashSet::new();
    for entry in &entries {
        if !seen.insert(entry.name.as_str()) {
            return Err(CoreError::Config(format!("duplicate job name {:?}", entry.name)).into());
        }
    }
    Ok(entries)
}

/// Schedule every active entry, guarded, and record definitions and next
/// run times in the store.
pub fn register_jobs(
    scheduler: &Scheduler,
    services: &Services,
    entries: Vec<JobEntry>,
) -> Result<Vec<(String, ScheduledJobId)>> {
    let now = Utc::now();
    let mut scheduled = Vec::with_capacity(entries.len());

    for entry in entries {
        services.store.upsert_job_definition(&entry.definition, now)?;
        if !entry.definition.is_active {
            services.store.update_next_run(&entry.name, None, now)?;
            info!(job = %entry.name, "job inactive, not scheduled");
            continue;
        }

        let guard = match entry.lock_timeout_minutes {
            Some(minutes) => services.guard.with_timeout_minutes(minutes),
            None => services.guard.clone(),
        };
        let slot = Arc::new(OnceLock::new());
        let job = record_next_run(
            scheduler.clone(),
            Arc::clone(&services.store),
            &entry.name,
            Arc::clone(&slot),
            guard.wrap(entry.name.clone(), entry.job),
        );

        let id = scheduler.schedule_spec(entry.name.clone(), &entry.trigger, job)?;
        if slot.set(id).is_err() {
            warn!(job = %entry.name, %id, "next-run slot already bound; keeping the first entry");
        }
        let next_run = scheduler.job_status(id)?.next_run;
        services.store.update_next_run(&entry.name, next_run, now)?;
        info!(job = %entry.name, %id, next_run = ?next_run, "job registered");
        scheduled.push((entry.name, id));
    }
    Ok(scheduled)
}

/// Run one job immediately: manual trigger, `force = true`, same lock.
pub async fn run_now(services: &Services, config: &CadenceConfig, name: &str) -> Result<GuardedRun> {
    let entry = catalogue(config, services)?
        .into_iter()
        .find(|e| e.name == name)
        .ok_or_else(|| RunnerError::JobNotFound(name.to_string()))?;

    let store = Arc::clone(&services.store);
    let definition = entry.definition.clone();
    run_blocking(move || store.upsert_job_definition(&definition, Utc::now())).await?;
    let guard = match entry.lock_timeout_minutes {
        Some(minutes) => services.guard.with_timeout_minutes(minutes),
        None => services.guard.clone(),
    };
    Ok(guard.run_now(name, &entry.job).await?)
}

fn command_entry(job: &JobConfig) -> JobEntry {
    JobEntry {
        name: job.name.clone(),
        trigger: job.trigger.clone(),
        definition: JobDefinition {
            name: job.name.clone(),
            description: job.description.clone(),
            schedule_type: job.trigger.kind_name().to_string(),
            schedule_config: serde_json::to_string(&job.trigger).ok(),
            is_active: job.active,
        },
        lock_timeout_minutes: job.lock_timeout_minutes,
        job: command_job(job),
    }
}

fn maintenance_entry(name: &str, description: &str, trigger: TriggerSpec, job: JobFn) -> JobEntry {
    JobEntry {
        name: name.to_string(),
        definition: JobDefinition {
            name: name.to_string(),
            description: Some(description.to_string()),
            schedule_type: trigger.kind_name().to_string(),
            schedule_config: serde_json::to_string(&trigger).ok(),
            is_active: true,
        },
        trigger,
        lock_timeout_minutes: None,
        job,
    }
}

/// After each fire, store the scheduler's estimate of the next one.
///
/// The wrapper holds a scheduler handle, so the scheduler must be cleared
/// when the runner stops to break the reference cycle.
fn record_next_run(
    scheduler: Scheduler,
    store: Arc<dyn ExecutionStore>,
    name: &str,
    slot: Arc<OnceLock<ScheduledJobId>>,
    job: JobFn,
) -> JobFn {
    let name: Arc<str> = Arc::from(name);
    Arc::new(move |args| {
        let scheduler = scheduler.clone();
        let store = Arc::clone(&store);
        let name = Arc::clone(&name);
        let slot = Arc::clone(&slot);
        let job = Arc::clone(&job);
        Box::pin(async move {
            let result = job(args).await;
            let next_run = slot
                .get()
                .and_then(|id| scheduler.job_status(*id).ok())
                .and_then(|status| status.next_run);
            let job_name = Arc::clone(&name);
            let recorded =
                run_blocking(move || store.update_next_run(&job_name, next_run, Utc::now())).await;
            if let Err(e) = recorded {
                warn!(job = %name, "failed to record next run: {e}");
            }
            result
        })
    })
}

struct CommandSpec {
    name: String,
    command: String,
    args: Vec<String>,
    working_dir: Option<String>,
    timeout: Duration,
}

/// A [`JobFn`] that runs the configured program as a child process.
///
/// Exit status 0 is success with `{exit_code, stdout, stderr}` as the
/// result; anything else fails with stderr as the traceback. The child is
/// killed when the timeout expires.
pub fn command_job(job: &JobConfig) -> JobFn {
    let spec = Arc::new(CommandSpec {
        name: job.name.clone(),
        command: job.command.clone(),
        args: job.args.clone(),
        working_dir: job.working_dir.clone(),
        timeout: Duration::from_secs(job.timeout_secs.max(1)),
    });
    job_fn(move |args| run_command(Arc::clone(&spec), args))
}

async fn run_command(spec: Arc<CommandSpec>, args: JobArgs) -> JobResult {
    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .env("CADENCE_JOB_NAME", &spec.name);
    if args.force {
        cmd.env("CADENCE_FORCE", "1");
    }
    if let Some(ctx) = current_execution() {
        cmd.env("CADENCE_EXECUTION_ID", ctx.execution_id());
    }
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let child = cmd
        .spawn()
        .map_err(|e| JobError::new(format!("failed to spawn {}: {e}", spec.command)))?;
    debug!(job = %spec.name, pid = ?child.id(), "command started");
    note(LogLevel::Info, &format!("started {} {}", spec.command, spec.args.join(" "))).await;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(JobError::from_error(&e)),
        Err(_) => {
            let message = format!("{} timed out after {}s", spec.command, spec.timeout.as_secs());
            note(LogLevel::Error, &message).await;
            return Err(JobError::new(message));
        }
    };

    let stdout = truncate_output(String::from_utf8_lossy(&output.stdout).trim_end(), MAX_OUTPUT_CHARS);
    let stderr = truncate_output(String::from_utf8_lossy(&output.stderr).trim_end(), MAX_OUTPUT_CHARS);
    let exit_code = output.status.code();

    if output.status.success() {
        note(LogLevel::Info, &format!("{} exited with status 0", spec.command)).await;
        return Ok(json!({
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
        }));
    }

    let message = match exit_code {
        Some(code) => format!("{} exited with status {code}", spec.command),
        None => format!("{} was terminated by a signal", spec.command),
    };
    note(LogLevel::Error, &message).await;
    Err(JobError {
        message,
        traceback: (!stderr.is_empty()).then_some(stderr),
    })
}

/// Append to the current execution's log, if there is one.
async fn note(level: LogLevel, message: &str) {
    if let Some(ctx) = current_execution() {
        if let Err(e) = ctx.log(level, message, Some("command")).await {
            warn!(job = %ctx.job_name(), "failed to append execution log: {e}");
        }
    }
}

fn retention_job(store: Arc<dyn ExecutionStore>, days_to_keep: u32) -> JobFn {
    job_fn(move |_args| {
        let store = Arc::clone(&store);
        async move {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(days_to_keep));
            let (executions, logs) = run_blocking(move || store.delete_executions_before(cutoff))
                .await
                .map_err(|e| JobError::from_error(&e))?;
            info!(executions, logs, days_to_keep, "retention cleanup finished");
            Ok(json!({
                "executions_deleted": executions,
                "logs_deleted": logs,
                "cutoff": cutoff,
            }))
        }
    })
}

fn stale_sweep_job(lock: ExecutionLock, stale_after_minutes: u64) -> JobFn {
    let max_age = chrono::Duration::minutes(stale_after_minutes.min(5_256_000) as i64);
    job_fn(move |_args| {
        let lock = lock.clone();
        async move {
            let reaped = lock
                .sweep_stale_executions_async(max_age)
                .await
                .map_err(|e| JobError::from_error(&e))?;
            Ok(json!({ "reaped": reaped }))
        }
    })
}

/// Keep the head and tail of `output`, dropping the middle past `max_chars`.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_owned();
    }
    let half = max_chars / 2;
    let head: String = output.chars().take(half).collect();
    let tail: String = output.chars().skip(total - half).collect();
    let omitted = total - 2 * half;
    format!("{head}\n\n... [{omitted} chars omitted] ...\n\n{tail}")
}
