use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Reference offset used when neither the trigger nor the scheduler config names one.
pub const DEFAULT_TIMEZONE: &str = "+00:00";

/// Declarative trigger, as written in `cadence.toml` or sent by an admin UI.
///
/// Weekday numbering is 0 = Monday … 6 = Sunday. `timezone` is a fixed UTC
/// offset such as `"+05:30"`, `"-08:00"`, `"UTC"` or `"Z"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Fire after `delay_seconds`, then every `repeat_seconds` (one-shot when absent).
    Interval {
        #[serde(default)]
        delay_seconds: u64,
        #[serde(default)]
        repeat_seconds: Option<u64>,
    },

    /// Fire every day at HH:MM local to `timezone`.
    Daily {
        hour: u8,
        minute: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },

    /// Fire once a week on `day_of_week` at HH:MM local to `timezone`.
    Weekly {
        day_of_week: u8,
        hour: u8,
        minute: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },

    /// Fire on `day_of_month` (clamped to the month's last day).
    Monthly {
        day_of_month: u8,
        hour: u8,
        minute: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },

    /// Fire on the last Monday–Friday of every month.
    LastWeekdayOfMonth {
        hour: u8,
        minute: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },

    /// Fire on the last given weekday of every month (e.g. last Friday).
    LastDayOfWeekOfMonth {
        day_of_week: u8,
        hour: u8,
        minute: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
}

impl TriggerSpec {
    /// Stable name written to the `jobs.schedule_type` column.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TriggerSpec::Interval { .. } => "interval",
            TriggerSpec::Daily { .. } => "daily",
            TriggerSpec::Weekly { .. } => "weekly",
            TriggerSpec::Monthly { .. } => "monthly",
            TriggerSpec::LastWeekdayOfMonth { .. } => "last_weekday_of_month",
            TriggerSpec::LastDayOfWeekOfMonth { .. } => "last_day_of_week_of_month",
        }
    }

    /// Explicit offset for calendar kinds, if one was given.
    pub fn timezone(&self) -> Option<&str> {
        match self {
            TriggerSpec::Interval { .. } => None,
            TriggerSpec::Daily { timezone, .. }
            | TriggerSpec::Weekly { timezone, .. }
            | TriggerSpec::Monthly { timezone, .. }
            | TriggerSpec::LastWeekdayOfMonth { timezone, .. }
            | TriggerSpec::LastDayOfWeekOfMonth { timezone, .. } => timezone.as_deref(),
        }
    }

    /// Check ranges without building anything.
    pub fn validate(&self) -> Result<()> {
        match self {
            TriggerSpec::Interval {
                repeat_seconds: Some(0),
                ..
            } => Err(CoreError::InvalidTrigger(
                "repeat_seconds must be greater than zero".to_string(),
            )),
            TriggerSpec::Interval { .. } => Ok(()),
            TriggerSpec::Daily {
                hour,
                minute,
                timezone,
            }
            | TriggerSpec::LastWeekdayOfMonth {
                hour,
                minute,
                timezone,
            } => {
                check_time(*hour, *minute)?;
                check_timezone(timezone.as_deref())
            }
            TriggerSpec::Weekly {
                day_of_week,
                hour,
                minute,
                timezone,
            }
            | TriggerSpec::LastDayOfWeekOfMonth {
                day_of_week,
                hour,
                minute,
                timezone,
            } => {
                check_day_of_week(*day_of_week)?;
                check_time(*hour, *minute)?;
                check_timezone(timezone.as_deref())
            }
            TriggerSpec::Monthly {
                day_of_month,
                hour,
                minute,
                timezone,
            } => {
                if !(1..=31).contains(day_of_month) {
                    return Err(CoreError::InvalidTrigger(format!(
                        "day_of_month must be 1-31, got {day_of_month}"
                    )));
                }
                check_time(*hour, *minute)?;
                check_timezone(timezone.as_deref())
            }
        }
    }
}

fn check_timezone(tz: Option<&str>) -> Result<()> {
    match tz {
        Some(tz) => parse_utc_offset(tz).map(|_| ()),
        None => Ok(()),
    }
}

fn check_time(hour: u8, minute: u8) -> Result<()> {
    if hour > 23 || minute > 59 {
        return Err(CoreError::InvalidTrigger(format!(
            "time {hour:02}:{minute:02} is out of range"
        )));
    }
    Ok(())
}

fn check_day_of_week(day: u8) -> Result<()> {
    if day > 6 {
        return Err(CoreError::InvalidTrigger(format!(
            "day_of_week must be 0-6 (Monday-Sunday), got {day}"
        )));
    }
    Ok(())
}

/// Parse a fixed UTC offset (`"+05:30"`, `"-0800"`, `"UTC"`, `"Z"`).
pub fn parse_utc_offset(tz: &str) -> Result<FixedOffset> {
    let tz = tz.trim();
    if tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0)
            .ok_or_else(|| CoreError::InvalidTrigger("bad UTC offset".to_string()));
    }
    tz.parse::<FixedOffset>()
        .map_err(|e| CoreError::InvalidTrigger(format!("bad timezone offset {tz:?}: {e}")))
}
