use cadence_core::CoreError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The provided trigger is invalid or has no future run.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No scheduled entry with the given ID exists.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
