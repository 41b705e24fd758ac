//! Execution lifecycle recording.
//!
//! [`ExecutionTracker::begin`] inserts a `running` execution and returns an
//! [`ExecutionScope`]. Finishing the scope writes the terminal status and
//! folds the outcome into the job's aggregate statistics; dropping it
//! unfinished (panic, future cancelled) records a failure instead.
//!
//! The `_async` variants and [`ExecutionContext`] run their store calls on
//! the blocking pool, so job bodies only ever suspend on storage.

use std::future::Future;
use std::sync::Arc;

use cadence_core::config::TrackingConfig;
use cadence_core::{JobError, JobResult};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::resources::{NoopSampler, ResourceSampler, SystemSampler};
use crate::store::{run_blocking, ExecutionStore};
use crate::types::{
    ExecutionCompletion, ExecutionStatus, LogLevel, NewExecution, TriggerType,
};

/// Message recorded when a scope is dropped before `finish`.
pub const CANCELLED_MESSAGE: &str = "Execution cancelled before completion";

tokio::task_local! {
    static CURRENT_EXECUTION: ExecutionContext;
}

/// Context of the tracked execution the current task is running inside, if any.
pub fn current_execution() -> Option<ExecutionContext> {
    CURRENT_EXECUTION.try_with(|ctx| ctx.clone()).ok()
}

/// Per-run metadata recorded on the execution row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackOptions {
    /// Defaults to the start time.
    pub scheduled_time: Option<DateTime<Utc>>,
    pub trigger_type: TriggerType,
    pub triggered_by: Option<i64>,
    pub retry_count: u32,
    pub parent_execution_id: Option<String>,
}

impl TrackOptions {
    pub fn manual() -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            ..Self::default()
        }
    }

    /// Options for retry attempt `retry_count` of `parent_execution_id`.
    pub fn retry(parent_execution_id: impl Into<String>, retry_count: u32) -> Self {
        Self {
            trigger_type: TriggerType::Retry,
            retry_count,
            parent_execution_id: Some(parent_execution_id.into()),
            ..Self::default()
        }
    }
}

/// Handle given to a job body for logging and result reporting.
#[derive(Clone)]
pub struct ExecutionContext {
    store: Arc<dyn ExecutionStore>,
    execution_id: Arc<str>,
    job_name: Arc<str>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("execution_id", &self.execution_id)
            .field("job_name", &self.job_name)
            .finish()
    }
}

impl ExecutionContext {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Append a log line to this execution. Awaited lines keep their call order.
    pub async fn log(&self, level: LogLevel, message: &str, source: Option<&str>) -> Result<()> {
        let store = Arc::clone(&self.store);
        let execution_id = Arc::clone(&self.execution_id);
        let message = message.to_string();
        let source = source.map(str::to_string);
        let at = Utc::now();
        run_blocking(move || {
            store.append_log(&execution_id, level, &message, source.as_deref(), at)?;
            Ok(())
        })
        .await
    }

    pub async fn info(&self, message: &str) -> Result<()> {
        self.log(LogLevel::Info, message, None).await
    }

    pub async fn warning(&self, message: &str) -> Result<()> {
        self.log(LogLevel::Warning, message, None).await
    }

    pub async fn error(&self, message: &str) -> Result<()> {
        self.log(LogLevel::Error, message, None).await
    }

    /// Store `value` as the execution's result data. Takes precedence over
    /// the value the body returns.
    pub async fn set_result_data(&self, value: &serde_json::Value) -> Result<()> {
        let store = Arc::clone(&self.store);
        let execution_id = Arc::clone(&self.execution_id);
        let value = value.clone();
        run_blocking(move || store.set_result_data(&execution_id, &value)).await
    }
}

/// Summary of a finished execution, handed back to the caller.
#[derive(Debug, Clone)]
pub struct TrackedRun {
    pub execution_id: String,
    pub job_name: String,
    pub status: ExecutionStatus,
    pub duration_secs: i64,
    /// What the body returned.
    pub result: JobResult,
}

impl TrackedRun {
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Records execution lifecycles and per-job statistics.
#[derive(Clone)]
pub struct ExecutionTracker {
    store: Arc<dyn ExecutionStore>,
    sampler: Arc<dyn ResourceSampler>,
}

impl ExecutionTracker {
    pub fn new(store: Arc<dyn ExecutionStore>, sampler: Arc<dyn ResourceSampler>) -> Self {
        Self { store, sampler }
    }

    pub fn from_config(store: Arc<dyn ExecutionStore>, config: &TrackingConfig) -> Self {
        let sampler: Arc<dyn ResourceSampler> = if config.disable_resource_sampling {
            Arc::new(NoopSampler)
        } else {
            Arc::new(SystemSampler::new())
        };
        Self::new(store, sampler)
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Insert a `running` execution for `job_name`, creating the job row if needed.
    pub fn begin(&self, job_name: &str, opts: TrackOptions) -> Result<ExecutionScope> {
        let started_at = Utc::now();
        let snapshot = self.sampler.sample();
        let job = self.store.get_or_create_job(job_name, started_at)?;
        let execution_id = Uuid::new_v4().to_string();

        self.store.insert_execution(&NewExecution {
            execution_id: execution_id.clone(),
            job_id: job.id,
            scheduled_time: opts.scheduled_time.unwrap_or(started_at),
            started_at,
            trigger_type: opts.trigger_type,
            triggered_by: opts.triggered_by,
            retry_count: opts.retry_count,
            parent_execution_id: opts.parent_execution_id,
            cpu_usage_start: snapshot.cpu_percent,
            memory_usage_start: snapshot.memory_percent,
        })?;

        info!(
            job = %job_name,
            execution_id = %execution_id,
            trigger = %opts.trigger_type,
            retry = opts.retry_count,
            "execution started"
        );

        Ok(ExecutionScope {
            ctx: ExecutionContext {
                store: Arc::clone(&self.store),
                execution_id: Arc::from(execution_id.as_str()),
                job_name: Arc::from(job_name),
            },
            sampler: Arc::clone(&self.sampler),
            started_at,
            finished: false,
        })
    }

    /// [`begin`](Self::begin) on the blocking pool.
    pub async fn begin_async(&self, job_name: &str, opts: TrackOptions) -> Result<ExecutionScope> {
        let tracker = self.clone();
        let job_name = job_name.to_string();
        run_blocking(move || tracker.begin(&job_name, opts)).await
    }

    /// Run `body` inside a tracked execution.
    ///
    /// Entry failures are returned; exit bookkeeping is best-effort and only
    /// logged. The body's context is also reachable through
    /// [`current_execution`].
    pub async fn track<F, Fut>(
        &self,
        job_name: &str,
        opts: TrackOptions,
        body: F,
    ) -> Result<TrackedRun>
    where
        F: FnOnce(ExecutionContext) -> Fut,
        Fut: Future<Output = JobResult>,
    {
        let scope = self.begin_async(job_name, opts).await?;
        let ctx = scope.context().clone();
        let result = CURRENT_EXECUTION.scope(ctx.clone(), body(ctx)).await;
        scope.finish_async(result).await
    }
}

/// An execution in state `running`. Finish it exactly once.
pub struct ExecutionScope {
    ctx: ExecutionContext,
    sampler: Arc<dyn ResourceSampler>,
    started_at: DateTime<Utc>,
    finished: bool,
}

impl ExecutionScope {
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn execution_id(&self) -> &str {
        self.ctx.execution_id()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record the terminal status for `result` and update the job aggregate.
    pub fn finish(mut self, result: JobResult) -> TrackedRun {
        self.finished = true;
        let (status, duration_secs) = self.complete(&result);
        TrackedRun {
            execution_id: self.ctx.execution_id().to_string(),
            job_name: self.ctx.job_name().to_string(),
            status,
            duration_secs,
            result,
        }
    }

    /// [`finish`](Self::finish) on the blocking pool.
    pub async fn finish_async(self, result: JobResult) -> Result<TrackedRun> {
        run_blocking(move || Ok(self.finish(result))).await
    }

    fn complete(&self, result: &JobResult) -> (ExecutionStatus, i64) {
        let completed_at = Utc::now();
        let duration_secs = (completed_at - self.started_at).num_seconds().max(0);
        let snapshot = self.sampler.sample();

        let (status, error_message, error_traceback, result_data) = match result {
            Ok(value) => (
                ExecutionStatus::Success,
                None,
                None,
                (!value.is_null()).then(|| value.clone()),
            ),
            Err(JobError { message, traceback }) => (
                ExecutionStatus::Failure,
                Some(message.clone()),
                traceback.clone(),
                None,
            ),
        };

        let completion = ExecutionCompletion {
            completed_at,
            duration_secs,
            status,
            error_message,
            error_traceback,
            cpu_usage_end: snapshot.cpu_percent,
            memory_usage_end: snapshot.memory_percent,
            result_data,
        };

        let job_name = self.ctx.job_name();
        let execution_id = self.ctx.execution_id();
        match self.ctx.store.complete_execution(execution_id, &completion) {
            Ok(Some(_)) => match result {
                Ok(_) => info!(job = %job_name, execution_id = %execution_id, duration_secs, "execution succeeded"),
                Err(e) => error!(job = %job_name, execution_id = %execution_id, duration_secs, "execution failed: {e}"),
            },
            Ok(None) => warn!(
                job = %job_name,
                execution_id = %execution_id,
                "execution was already finalised (reaped as stale?); outcome not recorded"
            ),
            Err(e) => warn!(
                job = %job_name,
                execution_id = %execution_id,
                "failed to record execution outcome: {e}"
            ),
        }
        (status, duration_secs)
    }
}

impl Drop for ExecutionScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let scope = ExecutionScope {
            ctx: self.ctx.clone(),
            sampler: Arc::clone(&self.sampler),
            started_at: self.started_at,
            finished: true,
        };
        let record = move || {
            scope.complete(&Err(JobError::new(CANCELLED_MESSAGE)));
        };
        // Cancelled futures are dropped on a runtime worker.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(record);
            }
            Err(_) => record(),
        }
    }
}
