//! `cadence-tracking`: execution locking, lifecycle tracking and per-job
//! statistics on top of a SQLite store.
//!
//! # Pieces
//!
//! | Module      | Role                                                        |
//! |-------------|-------------------------------------------------------------|
//! | `store`     | `ExecutionStore` trait + `SqliteStore` (connection per op)  |
//! | `lock`      | `ExecutionLock`: stale-run reaping + advisory lock rows     |
//! | `tracker`   | `ExecutionTracker`: running → success/failure transitions   |
//! | `guard`     | `JobGuard`: lock + tracker around a `JobFn`, with retries   |
//! | `stats`     | Aggregate statistics and performance metrics                |
//! | `resources` | Best-effort CPU / memory sampling                           |

pub mod db;
pub mod error;
pub mod guard;
pub mod lock;
pub mod resources;
pub mod stats;
pub mod store;
pub mod tracker;
pub mod types;

pub use error::{Result, TrackingError};
pub use guard::{GuardConfig, GuardedRun, JobGuard};
pub use lock::{lock_token, BusyReason, ExecutionLock, LockGuard, LockOutcome};
pub use resources::{NoopSampler, ResourceSampler, ResourceSnapshot, SystemSampler};
pub use stats::{JobStatistics, OverallStatistics, PerformanceMetrics};
pub use store::{run_blocking, ExecutionStore, SqliteStore};
pub use tracker::{
    current_execution, ExecutionContext, ExecutionScope, ExecutionTracker, TrackOptions,
    TrackedRun,
};
pub use types::{
    ExecutionLogEntry, ExecutionRecord, ExecutionStatus, JobDefinition, JobRecord, JobState,
    LogLevel, TriggerType,
};
