//! `cadence-core`: configuration, shared error type, and the job-function
//! contract used by every other cadence crate.

pub mod config;
pub mod error;
pub mod job;
pub mod types;

pub use error::{CoreError, Result};
pub use job::{job_fn, JobArgs, JobError, JobFn, JobFuture, JobOutput, JobResult};
pub use types::TriggerSpec;
