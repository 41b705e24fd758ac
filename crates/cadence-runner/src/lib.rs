//! `cadence-runner`: hosts the scheduler in a supervised thread, wires the
//! configured jobs through the lock and tracker, and backs the `cadence` CLI.

pub mod error;
pub mod jobs;
pub mod manager;
pub mod service;
pub mod state;

pub use error::{Result, RunnerError};
pub use manager::{HealthReport, RunnerLifecycleManager, RunnerReport};
pub use service::Services;
pub use state::{RunnerState, RunnerStatus, StateFile};
