use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc, Weekday,
};

/// Next HH:MM (local to `offset`) strictly after `from`.
pub fn next_daily(
    from: DateTime<Utc>,
    hour: u8,
    minute: u8,
    offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    let today = from.with_timezone(&offset).date_naive();
    let candidate = at_local(today, hour, minute, offset)?;
    if candidate > from {
        Some(candidate)
    } else {
        // Today's window has passed.
        at_local(today + Duration::days(1), hour, minute, offset)
    }
}

/// Next `day_of_week` (0 = Monday … 6 = Sunday) at HH:MM strictly after `from`.
pub fn next_weekly(
    from: DateTime<Utc>,
    day_of_week: u8,
    hour: u8,
    minute: u8,
    offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    let today = from.with_timezone(&offset).date_naive();
    let today_dow = i64::from(today.weekday().num_days_from_monday());
    let days_ahead = (i64::from(day_of_week.min(6)) - today_dow).rem_euclid(7);

    let candidate = at_local(today + Duration::days(days_ahead), hour, minute, offset)?;
    if candidate > from {
        Some(candidate)
    } else {
        // Same weekday, time already passed: one week on.
        Some(candidate + Duration::days(7))
    }
}

/// Next `day_of_month` at HH:MM, clamped to the month's last day (31 → 30 in April).
pub fn next_monthly(
    from: DateTime<Utc>,
    day_of_month: u8,
    hour: u8,
    minute: u8,
    offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    next_matching_month(from, hour, minute, offset, |year, month| {
        Some(u32::from(day_of_month.max(1)).min(days_in_month(year, month)))
    })
}

/// Last Monday–Friday of the month at HH:MM.
pub fn next_last_weekday_of_month(
    from: DateTime<Utc>,
    hour: u8,
    minute: u8,
    offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    next_matching_month(from, hour, minute, offset, |year, month| {
        let mut date = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))?;
        while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            date = date.pred_opt()?;
        }
        Some(date.day())
    })
}

/// Last given weekday of the month (e.g. 4 = the last Friday) at HH:MM.
pub fn next_last_day_of_week_of_month(
    from: DateTime<Utc>,
    day_of_week: u8,
    hour: u8,
    minute: u8,
    offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    let target = u32::from(day_of_week.min(6));
    next_matching_month(from, hour, minute, offset, |year, month| {
        let mut date = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))?;
        while date.weekday().num_days_from_monday() != target {
            date = date.pred_opt()?;
        }
        Some(date.day())
    })
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Walk months starting with the one containing `from` (local time) and
/// return the first picked day whose HH:MM lies strictly after `from`.
fn next_matching_month(
    from: DateTime<Utc>,
    hour: u8,
    minute: u8,
    offset: FixedOffset,
    pick_day: impl Fn(i32, u32) -> Option<u32>,
) -> Option<DateTime<Utc>> {
    let local = from.with_timezone(&offset);
    let (mut year, mut month) = (local.year(), local.month());
    // Two iterations always suffice; the rest covers pathological pickers.
    for _ in 0..13 {
        let day = pick_day(year, month)?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let candidate = at_local(date, hour, minute, offset)?;
        if candidate > from {
            return Some(candidate);
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    None
}

fn at_local(date: NaiveDate, hour: u8, minute: u8, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(u32::from(hour), u32::from(minute), 0)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
