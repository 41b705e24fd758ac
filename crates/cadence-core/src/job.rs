//! The job-function contract.
//!
//! A job is an async callable that takes optional overrides ([`JobArgs`]) and
//! resolves to an opaque JSON result or a [`JobError`]. The scheduler only
//! ever sees [`JobFn`]; the tracking layer wraps one `JobFn` in another to add
//! locking and lifecycle bookkeeping.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Opaque result payload returned by a job body.
pub type JobOutput = serde_json::Value;

pub type JobResult = std::result::Result<JobOutput, JobError>;

pub type JobFuture = Pin<Box<dyn Future<Output = JobResult> + Send + 'static>>;

/// Shared, re-invocable job body.
pub type JobFn = Arc<dyn Fn(JobArgs) -> JobFuture + Send + Sync + 'static>;

/// Optional keyword overrides passed to every invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobArgs {
    /// Set for manual runs; bodies may use it to bypass their own date checks.
    #[serde(default)]
    pub force: bool,
    /// Identifier of the scheduler entry (or caller-chosen id) that fired the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl JobArgs {
    pub fn forced() -> Self {
        Self {
            force: true,
            job_id: None,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

/// Failure raised by a job body. Persisted as `error_message` / `error_traceback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            traceback: None,
        }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    /// Build a `JobError` from any error, rendering its `source()` chain as
    /// the traceback.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            traceback: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JobError {}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Box an async closure into a [`JobFn`].
pub fn job_fn<F, Fut>(f: F) -> JobFn
where
    F: Fn(JobArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}
