use std::sync::Arc;

use cadence_core::config::{LockConfig, TrackingConfig};
use cadence_core::{JobArgs, JobError, JobFn};
use tracing::{info, warn};

use crate::error::Result;
use crate::lock::{BusyReason, ExecutionLock, LockOutcome};
use crate::tracker::{ExecutionTracker, TrackOptions, TrackedRun};
use crate::types::TriggerType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    /// Age after which a running execution is presumed orphaned.
    pub timeout_minutes: u64,
    /// Extra attempts after a failure, all made while holding the same lock.
    pub max_retries: u32,
}

impl GuardConfig {
    pub fn new(lock: &LockConfig, tracking: &TrackingConfig) -> Self {
        Self {
            timeout_minutes: lock.timeout_minutes,
            max_retries: tracking.max_retries,
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::new(&LockConfig::default(), &TrackingConfig::default())
    }
}

#[derive(Debug, Clone)]
pub enum GuardedRun {
    /// Another run of the job held the lock; nothing was recorded.
    Skipped(BusyReason),
    /// The last attempt (after retries, if any).
    Completed(TrackedRun),
}

/// Lock + tracker around a job body: the production wrapper for every
/// scheduled job.
#[derive(Clone)]
pub struct JobGuard {
    lock: ExecutionLock,
    tracker: ExecutionTracker,
    config: GuardConfig,
}

impl JobGuard {
    pub fn new(lock: ExecutionLock, tracker: ExecutionTracker, config: GuardConfig) -> Self {
        Self {
            lock,
            tracker,
            config,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    /// Same guard with a different staleness timeout (per-job override).
    pub fn with_timeout_minutes(&self, timeout_minutes: u64) -> Self {
        let mut guard = self.clone();
        guard.config.timeout_minutes = timeout_minutes;
        guard
    }

    /// Acquire the lock for `job_name`, run `job` tracked, retry on failure,
    /// release. A busy lock is a skip, not an error.
    ///
    /// All bookkeeping runs on the blocking pool; only `job` runs on the
    /// calling task.
    pub async fn run(
        &self,
        job_name: &str,
        trigger_type: TriggerType,
        args: JobArgs,
        job: &JobFn,
    ) -> Result<GuardedRun> {
        let lock = match self
            .lock
            .acquire_async(job_name, self.config.timeout_minutes)
            .await?
        {
            LockOutcome::Acquired(lock) => lock,
            LockOutcome::Busy(reason) => return Ok(GuardedRun::Skipped(reason)),
        };

        let opts = TrackOptions {
            trigger_type,
            ..TrackOptions::default()
        };
        let mut run = self
            .tracker
            .track(job_name, opts, |_ctx| job(args.clone()))
            .await?;

        let parent = run.execution_id.clone();
        let mut attempt = 0;
        while !run.succeeded() && attempt < self.config.max_retries {
            attempt += 1;
            info!(job = %job_name, attempt, parent = %parent, "retrying failed job");
            run = self
                .tracker
                .track(job_name, TrackOptions::retry(&parent, attempt), |_ctx| {
                    job(args.clone())
                })
                .await?;
        }

        if let Err(e) = lock.release_async().await {
            warn!(job = %job_name, "failed to release execution lock: {e}");
        }
        Ok(GuardedRun::Completed(run))
    }

    /// Manual trigger: `trigger_type = manual`, `force = true`.
    pub async fn run_now(&self, job_name: &str, job: &JobFn) -> Result<GuardedRun> {
        let args = JobArgs::forced().with_job_id(job_name);
        self.run(job_name, TriggerType::Manual, args, job).await
    }

    /// Wrap `job` so every invocation goes through [`JobGuard::run`].
    ///
    /// A skipped run resolves to `{"skipped": true, "reason": ...}`; store
    /// failures surface as a [`JobError`] for the caller to log.
    pub fn wrap(&self, job_name: impl Into<String>, job: JobFn) -> JobFn {
        let guard = self.clone();
        let name: Arc<str> = Arc::from(job_name.into());
        Arc::new(move |args| {
            let guard = guard.clone();
            let name = Arc::clone(&name);
            let job = Arc::clone(&job);
            Box::pin(async move {
                match guard.run(&name, TriggerType::Scheduled, args, &job).await {
                    Ok(GuardedRun::Completed(run)) => run.result,
                    Ok(GuardedRun::Skipped(reason)) => Ok(serde_json::json!({
                        "skipped": true,
                        "reason": reason.to_string(),
                    })),
                    Err(e) => Err(JobError::from_error(&e)),
                }
            })
        })
    }
}
