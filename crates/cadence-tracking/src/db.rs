use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Initialise the tracking schema in `conn`.
///
/// Idempotent: every statement is `IF NOT EXISTS`, so this runs on every
/// startup. Timestamps are fixed-width RFC 3339 UTC strings (see
/// [`fmt_ts`]) so that lexical comparison in SQL matches chronological order.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            name                TEXT    NOT NULL UNIQUE,
            description         TEXT,
            schedule_type       TEXT    NOT NULL DEFAULT 'auto',
            schedule_config     TEXT,               -- JSON-encoded TriggerSpec
            is_active           INTEGER NOT NULL DEFAULT 1,
            status              TEXT    NOT NULL DEFAULT 'active',
            total_runs          INTEGER NOT NULL DEFAULT 0,
            successful_runs     INTEGER NOT NULL DEFAULT 0,
            failed_runs         INTEGER NOT NULL DEFAULT 0,
            average_duration    INTEGER,            -- whole seconds, decaying average
            last_run            TEXT,
            last_success        TEXT,
            last_failure        TEXT,
            last_error_message  TEXT,
            next_run            TEXT,
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS job_executions (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            execution_id        TEXT    NOT NULL UNIQUE,
            job_id              INTEGER NOT NULL REFERENCES jobs(id),
            scheduled_time      TEXT    NOT NULL,
            started_at          TEXT    NOT NULL,
            completed_at        TEXT,
            duration            INTEGER,
            status              TEXT    NOT NULL,   -- running | success | failure
            trigger_type        TEXT    NOT NULL DEFAULT 'scheduled',
            triggered_by        INTEGER,
            retry_count         INTEGER NOT NULL DEFAULT 0,
            parent_execution_id TEXT,
            cpu_usage_start     REAL,
            cpu_usage_end       REAL,
            memory_usage_start  REAL,
            memory_usage_end    REAL,
            error_message       TEXT,
            error_traceback     TEXT,
            result_data         TEXT,               -- opaque JSON
            created_at          TEXT    NOT NULL
        ) STRICT;

        -- Busy checks: WHERE job_id = ? AND status = 'running'
        CREATE INDEX IF NOT EXISTS idx_job_executions_job_status
            ON job_executions (job_id, status);
        CREATE INDEX IF NOT EXISTS idx_job_executions_started_at
            ON job_executions (started_at);

        CREATE TABLE IF NOT EXISTS job_execution_logs (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            execution_id  TEXT    NOT NULL REFERENCES job_executions(execution_id),
            log_level     TEXT    NOT NULL,
            message       TEXT    NOT NULL,
            source        TEXT,
            timestamp     TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_job_execution_logs_execution
            ON job_execution_logs (execution_id, id);

        -- One row per held lock; the primary key is the mutual-exclusion primitive.
        CREATE TABLE IF NOT EXISTS advisory_locks (
            lock_key     INTEGER PRIMARY KEY,
            job_name     TEXT    NOT NULL,
            holder       TEXT    NOT NULL,
            acquired_at  TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// Format a timestamp for storage: `2026-01-02T10:00:00.000000Z`.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp column.
pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn ts_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

pub(crate) fn opt_ts_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_ts(idx, &raw).map(Some),
        None => Ok(None),
    }
}

/// Parse an enum stored as text, surfacing bad values as conversion errors.
pub(crate) fn enum_col<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(e),
        )
    })
}
