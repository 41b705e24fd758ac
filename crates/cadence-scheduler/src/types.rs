use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::types::parse_utc_offset;
use cadence_core::TriggerSpec;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::recurrence;

/// Wall-clock callback deciding the next run strictly after its argument.
/// `None` retires the entry.
///
/// The argument is the current time, or the previous target if the wall
/// clock has fallen behind it, so a slot is never produced twice.
pub type NextRunFn = Arc<dyn Fn(DateTime<Utc>) -> Option<DateTime<Utc>> + Send + Sync + 'static>;

pub const WEEK: Duration = Duration::from_secs(7 * 86_400);
pub const DAY: Duration = Duration::from_secs(86_400);

/// When a scheduled job fires.
#[derive(Clone)]
pub enum Trigger {
    /// First fire after `delay`, then every `repeat`; one-shot when `repeat` is `None`.
    Interval {
        delay: Duration,
        repeat: Option<Duration>,
    },
    /// Weekly at HH:MM in a fixed offset; repeats every 7 days exactly.
    Weekly {
        day_of_week: u8,
        hour: u8,
        minute: u8,
        offset: FixedOffset,
    },
    /// Re-evaluated after every fire.
    Custom {
        kind: &'static str,
        next_run: NextRunFn,
    },
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval { delay, repeat } => f
                .debug_struct("Interval")
                .field("delay", delay)
                .field("repeat", repeat)
                .finish(),
            Trigger::Weekly {
                day_of_week,
                hour,
                minute,
                offset,
            } => f
                .debug_struct("Weekly")
                .field("day_of_week", day_of_week)
                .field("hour", hour)
                .field("minute", minute)
                .field("offset", offset)
                .finish(),
            Trigger::Custom { kind, .. } => f.debug_struct("Custom").field("kind", kind).finish(),
        }
    }
}

impl Trigger {
    pub fn once_after(delay: Duration) -> Self {
        Trigger::Interval {
            delay,
            repeat: None,
        }
    }

    pub fn every(period: Duration) -> Self {
        Trigger::Interval {
            delay: period,
            repeat: Some(period),
        }
    }

    pub fn weekly(day_of_week: u8, hour: u8, minute: u8, offset: FixedOffset) -> Result<Self> {
        if day_of_week > 6 || hour > 23 || minute > 59 {
            return Err(SchedulerError::InvalidSchedule(format!(
                "weekly trigger out of range: day {day_of_week}, {hour:02}:{minute:02}"
            )));
        }
        Ok(Trigger::Weekly {
            day_of_week,
            hour,
            minute,
            offset,
        })
    }

    /// Callback that reads the clock itself. A past time fires on the next tick.
    pub fn custom<F>(next_run: F) -> Self
    where
        F: Fn() -> Option<DateTime<Utc>> + Send + Sync + 'static,
    {
        Trigger::Custom {
            kind: "custom",
            next_run: Arc::new(move |_after| next_run()),
        }
    }

    /// Callback given the instant it must schedule after. See [`NextRunFn`].
    pub fn custom_after<F>(next_run: F) -> Self
    where
        F: Fn(DateTime<Utc>) -> Option<DateTime<Utc>> + Send + Sync + 'static,
    {
        Trigger::Custom {
            kind: "custom",
            next_run: Arc::new(next_run),
        }
    }

    /// Compile a declarative spec. Calendar kinds without their own timezone
    /// use `default_offset`.
    pub fn from_spec(spec: &TriggerSpec, default_offset: FixedOffset) -> Result<Self> {
        spec.validate()?;
        let offset = match spec.timezone() {
            Some(tz) => parse_utc_offset(tz)?,
            None => default_offset,
        };

        let trigger = match *spec {
            TriggerSpec::Interval {
                delay_seconds,
                repeat_seconds,
            } => Trigger::Interval {
                delay: Duration::from_secs(delay_seconds),
                repeat: repeat_seconds.map(Duration::from_secs),
            },
            TriggerSpec::Daily { hour, minute, .. } => {
                let now = Utc::now();
                let first = recurrence::next_daily(now, hour, minute, offset).ok_or_else(|| {
                    SchedulerError::InvalidSchedule("daily trigger has no next run".into())
                })?;
                Trigger::Interval {
                    delay: (first - now).to_std().unwrap_or(Duration::ZERO),
                    repeat: Some(DAY),
                }
            }
            TriggerSpec::Weekly {
                day_of_week,
                hour,
                minute,
                ..
            } => Trigger::weekly(day_of_week, hour, minute, offset)?,
            TriggerSpec::Monthly {
                day_of_month,
                hour,
                minute,
                ..
            } => Trigger::Custom {
                kind: "monthly",
                next_run: Arc::new(move |after| {
                    recurrence::next_monthly(after, day_of_month, hour, minute, offset)
                }),
            },
            TriggerSpec::LastWeekdayOfMonth { hour, minute, .. } => Trigger::Custom {
                kind: "last_weekday_of_month",
                next_run: Arc::new(move |after| {
                    recurrence::next_last_weekday_of_month(after, hour, minute, offset)
                }),
            },
            TriggerSpec::LastDayOfWeekOfMonth {
                day_of_week,
                hour,
                minute,
                ..
            } => Trigger::Custom {
                kind: "last_day_of_week_of_month",
                next_run: Arc::new(move |after| {
                    recurrence::next_last_day_of_week_of_month(
                        after,
                        day_of_week,
                        hour,
                        minute,
                        offset,
                    )
                }),
            },
        };
        Ok(trigger)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Interval { repeat: None, .. } => "once",
            Trigger::Interval { .. } => "interval",
            Trigger::Weekly { .. } => "weekly",
            Trigger::Custom { kind, .. } => *kind,
        }
    }
}

/// Scheduler-local identifier of a scheduled entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduledJobId(Uuid);

impl ScheduledJobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ScheduledJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ScheduledJobId {
    type Err = SchedulerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| SchedulerError::JobNotFound { id: s.to_string() })
    }
}

/// Point-in-time view of one scheduled entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJobStatus {
    pub id: ScheduledJobId,
    pub name: String,
    pub kind: String,
    /// Estimated wall-clock time of the next fire.
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
