use thiserror::Error;

/// Errors raised by the tracking subsystem.
///
/// "Job already running" is deliberately absent: it is reported as
/// `LockOutcome::Busy`, not as an error.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be mapped back to its domain type.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Job not found: {name}")]
    JobNotFound { name: String },

    #[error("Execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: String },

    /// A store call offloaded to the blocking pool panicked or was cancelled.
    #[error("Blocking task failed: {0}")]
    Blocking(String),
}

pub type Result<T> = std::result::Result<T, TrackingError>;
