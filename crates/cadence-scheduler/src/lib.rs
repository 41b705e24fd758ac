//! `cadence-scheduler`: in-process timer engine for async jobs.
//!
//! # Overview
//!
//! [`Scheduler`] keeps every entry in a min-heap keyed by monotonic fire
//! time. A single loop sleeps until the earliest entry is due (or the idle
//! ceiling passes), fires each due job on its own Tokio task, and reinserts
//! entries that repeat. Nothing here touches the database; persistence and
//! overlap protection live in `cadence-tracking`.
//!
//! # Triggers
//!
//! | Trigger    | Behaviour                                                  |
//! |------------|------------------------------------------------------------|
//! | `Interval` | First fire after a delay, then every period (or once)      |
//! | `Weekly`   | Weekday at HH:MM in a fixed UTC offset, exactly 7 days apart |
//! | `Custom`   | A callback picks each next wall-clock time; `None` retires |
//!
//! Declarative [`cadence_core::TriggerSpec`] values compile to one of these
//! via [`Trigger::from_spec`]: daily becomes a 24h interval, monthly and the
//! "last ... of month" kinds become custom triggers.

pub mod engine;
pub mod error;
pub mod queue;
pub mod recurrence;
pub mod types;

pub use engine::{Scheduler, SchedulerTask};
pub use error::{Result, SchedulerError};
pub use types::{ScheduledJobId, ScheduledJobStatus, Trigger, DAY, WEEK};
