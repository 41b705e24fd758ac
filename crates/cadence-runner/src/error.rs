use cadence_core::CoreError;
use cadence_scheduler::SchedulerError;
use cadence_tracking::TrackingError;
use thiserror::Error;

/// Errors raised by the runner and its CLI.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Tracking(#[from] TrackingError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No configured or built-in job with this name.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The runner thread could not be started.
    #[error("Runner thread error: {0}")]
    Thread(String),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
