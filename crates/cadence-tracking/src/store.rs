use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, instrument};

use crate::db::{enum_col, fmt_ts, init_db, opt_ts_col, ts_col};
use crate::error::{Result, TrackingError};
use crate::lock::BusyReason;
use crate::types::{
    ExecutionCompletion, ExecutionLogEntry, ExecutionRecord, JobDefinition, JobRecord, LogLevel,
    NewExecution, RunOutcome,
};

/// Everything one lock attempt needs, evaluated in a single write transaction.
#[derive(Debug, Clone)]
pub struct LockRequest<'a> {
    pub token: i64,
    pub job_name: &'a str,
    pub holder: &'a str,
    pub now: DateTime<Utc>,
    /// Running executions and lock rows older than this are reaped.
    pub stale_before: DateTime<Utc>,
    /// Running executions started at or after this count as "busy".
    pub busy_since: DateTime<Utc>,
    pub reap_message: &'a str,
}

/// Result of [`ExecutionStore::try_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockAttempt {
    /// Stale executions of this job forced to `failure` during the attempt.
    pub reaped: usize,
    /// `None` when the advisory row was inserted (lock held).
    pub blocked_by: Option<BusyReason>,
}

/// Persistence boundary for jobs, executions, logs and advisory locks.
///
/// Every method is a short unit of work; nothing holds a connection across
/// a job body.
pub trait ExecutionStore: Send + Sync + 'static {
    /// Fetch the job row for `name`, creating an `auto` row on first use.
    fn get_or_create_job(&self, name: &str, now: DateTime<Utc>) -> Result<JobRecord>;

    fn job(&self, name: &str) -> Result<Option<JobRecord>>;

    fn list_jobs(&self) -> Result<Vec<JobRecord>>;

    /// Insert or refresh the descriptive columns of a configured job.
    /// Statistics are never touched.
    fn upsert_job_definition(&self, def: &JobDefinition, now: DateTime<Utc>) -> Result<JobRecord>;

    /// Toggle `is_active`; inactive jobs report status `disabled`.
    fn set_job_active(&self, name: &str, active: bool, now: DateTime<Utc>) -> Result<()>;

    fn update_next_run(
        &self,
        name: &str,
        next_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    fn insert_execution(&self, new: &NewExecution) -> Result<()>;

    /// Move a running execution to its terminal status and fold the outcome
    /// into the job aggregate, atomically.
    ///
    /// Returns `None` (and changes nothing) when the execution is no longer
    /// running, e.g. because a stale sweep reaped it first.
    fn complete_execution(
        &self,
        execution_id: &str,
        completion: &ExecutionCompletion,
    ) -> Result<Option<JobRecord>>;

    fn set_result_data(&self, execution_id: &str, value: &serde_json::Value) -> Result<()>;

    fn append_log(
        &self,
        execution_id: &str,
        level: LogLevel,
        message: &str,
        source: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<i64>;

    fn execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>>;

    /// Most recent executions first, optionally for one job only.
    fn execution_history(&self, job_name: Option<&str>, limit: usize)
        -> Result<Vec<ExecutionRecord>>;

    /// Log lines of one execution in insertion order.
    fn execution_logs(&self, execution_id: &str) -> Result<Vec<ExecutionLogEntry>>;

    /// Executions started at or after `since`, oldest first.
    fn executions_since(&self, since: DateTime<Utc>) -> Result<Vec<ExecutionRecord>>;

    /// Reap, busy-check and try the advisory lock in one `IMMEDIATE` transaction.
    fn try_lock(&self, req: &LockRequest<'_>) -> Result<LockAttempt>;

    /// Delete the advisory row if `holder` still owns it. Returns whether a row went away.
    fn unlock(&self, token: i64, holder: &str) -> Result<bool>;

    /// Fail every running execution started before `stale_before` and drop
    /// lock rows of the same age. Returns the number of executions reaped.
    fn fail_stale_executions(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        message: &str,
    ) -> Result<usize>;

    /// Delete executions started before `before` together with their logs.
    /// Returns `(executions, log_lines)` deleted.
    fn delete_executions_before(&self, before: DateTime<Utc>) -> Result<(usize, usize)>;
}

/// Run a store call on Tokio's blocking pool.
///
/// Every call from async code goes through here: a connection waiting out
/// `busy_timeout` must not hold a runtime worker.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TrackingError::Blocking(e.to_string()))?
}

const JOB_COLUMNS: &str = "id, name, description, schedule_type, schedule_config, is_active,
     status, total_runs, successful_runs, failed_runs, average_duration, last_run,
     last_success, last_failure, last_error_message, next_run, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "e.execution_id, e.job_id, j.name, e.scheduled_time,
     e.started_at, e.completed_at, e.duration, e.status, e.trigger_type, e.triggered_by,
     e.retry_count, e.parent_execution_id, e.cpu_usage_start, e.cpu_usage_end,
     e.memory_usage_start, e.memory_usage_end, e.error_message, e.error_traceback,
     e.result_data";

/// SQLite-backed store. Opens a fresh connection for every operation.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`, switch it to WAL and
    /// run the idempotent schema setup.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self { path };
        let conn = store.connect()?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        init_db(&conn)?;
        debug!(path = %store.path.display(), "execution store ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(conn)
    }
}

impl ExecutionStore for SqliteStore {
    #[instrument(skip(self, now), fields(job = %name))]
    fn get_or_create_job(&self, name: &str, now: DateTime<Utc>) -> Result<JobRecord> {
        let conn = self.connect()?;
        let now = fmt_ts(now);
        // INSERT OR IGNORE + read back handles two runners creating the row at once.
        conn.execute(
            "INSERT OR IGNORE INTO jobs
             (name, description, schedule_type, is_active, status, created_at, updated_at)
             VALUES (?1, ?2, 'auto', 1, 'active', ?3, ?3)",
            rusqlite::params![name, format!("Auto-created job for {name}"), now],
        )?;
        let job = conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE name = ?1"),
            [name],
            row_to_job,
        )?;
        Ok(job)
    }

    #[instrument(skip(self), fields(job = %name))]
    fn job(&self, name: &str) -> Result<Option<JobRecord>> {
        let conn = self.connect()?;
        Ok(job_by_name(&conn, name)?)
    }

    #[instrument(skip(self))]
    fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY name"))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    #[instrument(skip(self, def, now), fields(job = %def.name))]
    fn upsert_job_definition(&self, def: &JobDefinition, now: DateTime<Utc>) -> Result<JobRecord> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO jobs
             (name, description, schedule_type, schedule_config, is_active, status,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5,
                     CASE WHEN ?5 THEN 'active' ELSE 'disabled' END, ?6, ?6)
             ON CONFLICT(name) DO UPDATE SET
                description     = excluded.description,
                schedule_type   = excluded.schedule_type,
                schedule_config = excluded.schedule_config,
                is_active       = excluded.is_active,
                status          = CASE
                    WHEN NOT excluded.is_active THEN 'disabled'
                    WHEN jobs.status != 'disabled' THEN jobs.status
                    WHEN jobs.failed_runs > 0 AND jobs.successful_runs = 0 THEN 'error'
                    ELSE 'active' END,
                updated_at      = excluded.updated_at",
            rusqlite::params![
                def.name,
                def.description,
                def.schedule_type,
                def.schedule_config,
                def.is_active,
                fmt_ts(now)
            ],
        )?;
        job_by_name(&conn, &def.name)?.ok_or_else(|| TrackingError::JobNotFound {
            name: def.name.clone(),
        })
    }

    #[instrument(skip(self, now), fields(job = %name))]
    fn set_job_active(&self, name: &str, active: bool, now: DateTime<Utc>) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE jobs SET
                is_active  = ?1,
                status     = CASE
                    WHEN NOT ?1 THEN 'disabled'
                    WHEN failed_runs > 0 AND successful_runs = 0 THEN 'error'
                    ELSE 'active' END,
                updated_at = ?2
             WHERE name = ?3",
            rusqlite::params![active, fmt_ts(now), name],
        )?;
        if changed == 0 {
            return Err(TrackingError::JobNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, now), fields(job = %name))]
    fn update_next_run(
        &self,
        name: &str,
        next_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE jobs SET next_run = ?1, updated_at = ?2 WHERE name = ?3",
            rusqlite::params![next_run.map(fmt_ts), fmt_ts(now), name],
        )?;
        if changed == 0 {
            return Err(TrackingError::JobNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, new), fields(execution_id = %new.execution_id))]
    fn insert_execution(&self, new: &NewExecution) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO job_executions
             (execution_id, job_id, scheduled_time, started_at, status, trigger_type,
              triggered_by, retry_count, parent_execution_id, cpu_usage_start,
              memory_usage_start, created_at)
             VALUES (?1, ?2, ?3, ?4, 'running', ?5, ?6, ?7, ?8, ?9, ?10, ?4)",
            rusqlite::params![
                new.execution_id,
                new.job_id,
                fmt_ts(new.scheduled_time),
                fmt_ts(new.started_at),
                new.trigger_type.to_string(),
                new.triggered_by,
                new.retry_count,
                new.parent_execution_id,
                new.cpu_usage_start,
                new.memory_usage_start,
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self, completion), fields(execution_id = %execution_id, status = %completion.status))]
    fn complete_execution(
        &self,
        execution_id: &str,
        completion: &ExecutionCompletion,
    ) -> Result<Option<JobRecord>> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let job_id: Option<i64> = tx
            .query_row(
                "SELECT job_id FROM job_executions
                 WHERE execution_id = ?1 AND status = 'running'",
                [execution_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(job_id) = job_id else {
            return Ok(None);
        };

        let result_json = completion
            .result_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        tx.execute(
            "UPDATE job_executions SET
                completed_at     = ?1,
                duration         = ?2,
                status           = ?3,
                error_message    = ?4,
                error_traceback  = ?5,
                cpu_usage_end    = ?6,
                memory_usage_end = ?7,
                result_data      = COALESCE(result_data, ?8)
             WHERE execution_id = ?9",
            rusqlite::params![
                fmt_ts(completion.completed_at),
                completion.duration_secs,
                completion.status.to_string(),
                completion.error_message,
                completion.error_traceback,
                completion.cpu_usage_end,
                completion.memory_usage_end,
                result_json,
                execution_id,
            ],
        )?;

        let mut job = tx.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            [job_id],
            row_to_job,
        )?;
        job.apply_outcome(&RunOutcome {
            succeeded: completion.status == crate::types::ExecutionStatus::Success,
            duration_secs: completion.duration_secs,
            completed_at: completion.completed_at,
            error_message: completion.error_message.clone(),
        });
        tx.execute(
            "UPDATE jobs SET
                total_runs         = ?1,
                successful_runs    = ?2,
                failed_runs        = ?3,
                average_duration   = ?4,
                last_run           = ?5,
                last_success       = ?6,
                last_failure       = ?7,
                last_error_message = ?8,
                status             = ?9,
                updated_at         = ?10
             WHERE id = ?11",
            rusqlite::params![
                job.total_runs,
                job.successful_runs,
                job.failed_runs,
                job.average_duration,
                job.last_run.map(fmt_ts),
                job.last_success.map(fmt_ts),
                job.last_failure.map(fmt_ts),
                job.last_error_message,
                job.status.to_string(),
                fmt_ts(job.updated_at),
                job.id,
            ],
        )?;
        tx.commit()?;
        Ok(Some(job))
    }

    #[instrument(skip(self, value), fields(execution_id = %execution_id))]
    fn set_result_data(&self, execution_id: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE job_executions SET result_data = ?1 WHERE execution_id = ?2",
            rusqlite::params![serde_json::to_string(value)?, execution_id],
        )?;
        if changed == 0 {
            return Err(TrackingError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            });
        }
        Ok(())
    }

    fn append_log(
        &self,
        execution_id: &str,
        level: LogLevel,
        message: &str,
        source: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO job_execution_logs (execution_id, log_level, message, source, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![execution_id, level.as_str(), message, source, fmt_ts(at)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[instrument(skip(self), fields(execution_id = %execution_id))]
    fn execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {EXECUTION_COLUMNS} FROM job_executions e
                     JOIN jobs j ON j.id = e.job_id
                     WHERE e.execution_id = ?1"
                ),
                [execution_id],
                row_to_execution,
            )
            .optional()?;
        Ok(record)
    }

    #[instrument(skip(self))]
    fn execution_history(
        &self,
        job_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions e
             JOIN jobs j ON j.id = e.job_id
             WHERE ?1 IS NULL OR j.name = ?1
             ORDER BY e.started_at DESC, e.id DESC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(rusqlite::params![job_name, limit as i64], row_to_execution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    #[instrument(skip(self), fields(execution_id = %execution_id))]
    fn execution_logs(&self, execution_id: &str) -> Result<Vec<ExecutionLogEntry>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, execution_id, log_level, message, source, timestamp
             FROM job_execution_logs
             WHERE execution_id = ?1
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map([execution_id], row_to_log)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    #[instrument(skip(self))]
    fn executions_since(&self, since: DateTime<Utc>) -> Result<Vec<ExecutionRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions e
             JOIN jobs j ON j.id = e.job_id
             WHERE e.started_at >= ?1
             ORDER BY e.started_at, e.id"
        ))?;
        let rows = stmt
            .query_map([fmt_ts(since)], row_to_execution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    #[instrument(skip(self, req), fields(job = %req.job_name, token = req.token))]
    fn try_lock(&self, req: &LockRequest<'_>) -> Result<LockAttempt> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = fmt_ts(req.now);
        let stale_before = fmt_ts(req.stale_before);

        let reaped = tx.execute(
            "UPDATE job_executions SET
                status        = 'failure',
                error_message = ?1,
                completed_at  = ?2
             WHERE status = 'running'
               AND started_at < ?3
               AND job_id IN (SELECT id FROM jobs WHERE name = ?4)",
            rusqlite::params![req.reap_message, now, stale_before, req.job_name],
        )?;
        tx.execute(
            "DELETE FROM advisory_locks WHERE lock_key = ?1 AND acquired_at < ?2",
            rusqlite::params![req.token, stale_before],
        )?;

        let running: Option<String> = tx
            .query_row(
                "SELECT e.execution_id FROM job_executions e
                 JOIN jobs j ON j.id = e.job_id
                 WHERE j.name = ?1 AND e.status = 'running' AND e.started_at >= ?2
                 ORDER BY e.started_at DESC
                 LIMIT 1",
                rusqlite::params![req.job_name, fmt_ts(req.busy_since)],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(execution_id) = running {
            tx.commit()?;
            return Ok(LockAttempt {
                reaped,
                blocked_by: Some(BusyReason::RunningExecution { execution_id }),
            });
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO advisory_locks (lock_key, job_name, holder, acquired_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![req.token, req.job_name, req.holder, now],
        )?;
        let blocked_by = if inserted == 1 {
            None
        } else {
            let holder: String = tx.query_row(
                "SELECT holder FROM advisory_locks WHERE lock_key = ?1",
                [req.token],
                |row| row.get(0),
            )?;
            Some(BusyReason::HeldElsewhere { holder })
        };
        tx.commit()?;
        Ok(LockAttempt { reaped, blocked_by })
    }

    #[instrument(skip(self))]
    fn unlock(&self, token: i64, holder: &str) -> Result<bool> {
        let conn = self.connect()?;
        let n = conn.execute(
            "DELETE FROM advisory_locks WHERE lock_key = ?1 AND holder = ?2",
            rusqlite::params![token, holder],
        )?;
        Ok(n > 0)
    }

    #[instrument(skip(self, now, message))]
    fn fail_stale_executions(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        message: &str,
    ) -> Result<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stale_before = fmt_ts(stale_before);
        let reaped = tx.execute(
            "UPDATE job_executions SET
                status        = 'failure',
                error_message = ?1,
                completed_at  = ?2
             WHERE status = 'running' AND started_at < ?3",
            rusqlite::params![message, fmt_ts(now), stale_before],
        )?;
        tx.execute(
            "DELETE FROM advisory_locks WHERE acquired_at < ?1",
            [&stale_before],
        )?;
        tx.commit()?;
        Ok(reaped)
    }

    #[instrument(skip(self))]
    fn delete_executions_before(&self, before: DateTime<Utc>) -> Result<(usize, usize)> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let before = fmt_ts(before);
        // Logs first: they reference executions.
        let logs = tx.execute(
            "DELETE FROM job_execution_logs WHERE execution_id IN
                (SELECT execution_id FROM job_executions WHERE started_at < ?1)",
            [&before],
        )?;
        let executions = tx.execute(
            "DELETE FROM job_executions WHERE started_at < ?1",
            [&before],
        )?;
        tx.commit()?;
        Ok((executions, logs))
    }
}

fn job_by_name(conn: &Connection, name: &str) -> rusqlite::Result<Option<JobRecord>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE name = ?1"),
        [name],
        row_to_job,
    )
    .optional()
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        schedule_type: row.get(3)?,
        schedule_config: row.get(4)?,
        is_active: row.get(5)?,
        status: enum_col(row, 6)?,
        total_runs: row.get(7)?,
        successful_runs: row.get(8)?,
        failed_runs: row.get(9)?,
        average_duration: row.get(10)?,
        last_run: opt_ts_col(row, 11)?,
        last_success: opt_ts_col(row, 12)?,
        last_failure: opt_ts_col(row, 13)?,
        last_error_message: row.get(14)?,
        next_run: opt_ts_col(row, 15)?,
        created_at: ts_col(row, 16)?,
        updated_at: ts_col(row, 17)?,
    })
}

fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let result_data = match row.get::<_, Option<String>>(18)? {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(18, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(ExecutionRecord {
        execution_id: row.get(0)?,
        job_id: row.get(1)?,
        job_name: row.get(2)?,
        scheduled_time: ts_col(row, 3)?,
        started_at: ts_col(row, 4)?,
        completed_at: opt_ts_col(row, 5)?,
        duration: row.get(6)?,
        status: enum_col(row, 7)?,
        trigger_type: enum_col(row, 8)?,
        triggered_by: row.get(9)?,
        retry_count: row.get(10)?,
        parent_execution_id: row.get(11)?,
        cpu_usage_start: row.get(12)?,
        cpu_usage_end: row.get(13)?,
        memory_usage_start: row.get(14)?,
        memory_usage_end: row.get(15)?,
        error_message: row.get(16)?,
        error_traceback: row.get(17)?,
        result_data,
    })
}

fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionLogEntry> {
    Ok(ExecutionLogEntry {
        id: row.get(0)?,
        execution_id: row.get(1)?,
        log_level: enum_col(row, 2)?,
        message: row.get(3)?,
        source: row.get(4)?,
        timestamp: ts_col(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionStatus, JobState, TriggerType};
    use chrono::Duration as ChronoDuration;

    fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::open(dir.path().join("cadence.db")).expect("open store");
        (dir, store)
    }

    fn running(store: &SqliteStore, job: &JobRecord, id: &str, started_at: DateTime<Utc>) {
        store
            .insert_execution(&NewExecution {
                execution_id: id.to_string(),
                job_id: job.id,
                scheduled_time: started_at,
                started_at,
                trigger_type: TriggerType::Scheduled,
                triggered_by: None,
                retry_count: 0,
                parent_execution_id: None,
                cpu_usage_start: Some(12.5),
                memory_usage_start: None,
            })
            .expect("insert execution");
    }

    fn completion(status: ExecutionStatus, secs: i64) -> ExecutionCompletion {
        ExecutionCompletion {
            completed_at: Utc::now(),
            duration_secs: secs,
            status,
            error_message: (status == ExecutionStatus::Failure).then(|| "boom".to_string()),
            error_traceback: None,
            cpu_usage_end: None,
            memory_usage_end: None,
            result_data: Some(serde_json::json!({ "rows": 3 })),
        }
    }

    #[test]
    fn get_or_create_job_is_lazy_and_stable() {
        let (_dir, store) = store();
        let now = Utc::now();
        let first = store.get_or_create_job("weekly-report", now).expect("create");
        let second = store.get_or_create_job("weekly-report", now).expect("fetch");
        assert_eq!(first.id, second.id);
        assert_eq!(first.schedule_type, "auto");
        assert_eq!(
            first.description.as_deref(),
            Some("Auto-created job for weekly-report")
        );
        assert_eq!(first.status, JobState::Active);
        assert_eq!(store.list_jobs().expect("list").len(), 1);
    }

    #[test]
    fn complete_execution_updates_row_and_aggregate() {
        let (_dir, store) = store();
        let job = store.get_or_create_job("nightly", Utc::now()).expect("job");
        running(&store, &job, "exec-1", Utc::now());

        let updated = store
            .complete_execution("exec-1", &completion(ExecutionStatus::Success, 10))
            .expect("complete")
            .expect("was running");
        assert_eq!(updated.total_runs, 1);
        assert_eq!(updated.average_duration, Some(10));

        let record = store.execution("exec-1").expect("read").expect("exists");
        assert_eq!(record.status, ExecutionStatus::Success);
        assert_eq!(record.duration, Some(10));
        assert_eq!(record.job_name, "nightly");
        assert_eq!(record.cpu_usage_start, Some(12.5));
        assert_eq!(record.result_data, Some(serde_json::json!({ "rows": 3 })));

        // A second terminal write is ignored.
        assert!(store
            .complete_execution("exec-1", &completion(ExecutionStatus::Failure, 1))
            .expect("complete again")
            .is_none());
        let job = store.job("nightly").expect("read").expect("exists");
        assert_eq!(job.total_runs, 1);
        assert_eq!(job.failed_runs, 0);
    }

    #[test]
    fn explicit_result_data_wins_over_returned_value() {
        let (_dir, store) = store();
        let job = store.get_or_create_job("export", Utc::now()).expect("job");
        running(&store, &job, "exec-1", Utc::now());
        store
            .set_result_data("exec-1", &serde_json::json!({ "explicit": true }))
            .expect("set result");
        store
            .complete_execution("exec-1", &completion(ExecutionStatus::Success, 1))
            .expect("complete");
        let record = store.execution("exec-1").expect("read").expect("exists");
        assert_eq!(record.result_data, Some(serde_json::json!({ "explicit": true })));
    }

    #[test]
    fn logs_keep_insertion_order_and_upper_case_levels() {
        let (_dir, store) = store();
        let job = store.get_or_create_job("export", Utc::now()).expect("job");
        running(&store, &job, "exec-1", Utc::now());
        let at = Utc::now();
        store
            .append_log("exec-1", LogLevel::Info, "starting", Some("export"), at)
            .expect("log");
        store
            .append_log("exec-1", LogLevel::Error, "disk full", None, at)
            .expect("log");

        let logs = store.execution_logs("exec-1").expect("logs");
        let messages: Vec<_> = logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["starting", "disk full"]);
        assert_eq!(logs[1].log_level, LogLevel::Error);

        let conn = Connection::open(store.path()).expect("open");
        let raw: String = conn
            .query_row(
                "SELECT log_level FROM job_execution_logs ORDER BY id LIMIT 1",
                [],
                |row| row.get(0),
            )
            .expect("raw level");
        assert_eq!(raw, "INFO");
    }

    #[test]
    fn history_is_newest_first_and_filterable() {
        let (_dir, store) = store();
        let a = store.get_or_create_job("a", Utc::now()).expect("job a");
        let b = store.get_or_create_job("b", Utc::now()).expect("job b");
        let base = Utc::now() - ChronoDuration::minutes(10);
        running(&store, &a, "a-1", base);
        running(&store, &b, "b-1", base + ChronoDuration::minutes(1));
        running(&store, &a, "a-2", base + ChronoDuration::minutes(2));

        let all = store.execution_history(None, 10).expect("history");
        let ids: Vec<_> = all.iter().map(|e| e.execution_id.as_str()).collect();
        assert_eq!(ids, vec!["a-2", "b-1", "a-1"]);

        let only_a = store.execution_history(Some("a"), 1).expect("history");
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].execution_id, "a-2");
    }

    #[test]
    fn set_job_active_toggles_disabled_status() {
        let (_dir, store) = store();
        store.get_or_create_job("report", Utc::now()).expect("job");
        store.set_job_active("report", false, Utc::now()).expect("disable");
        let job = store.job("report").expect("read").expect("exists");
        assert!(!job.is_active);
        assert_eq!(job.status, JobState::Disabled);

        store.set_job_active("report", true, Utc::now()).expect("enable");
        let job = store.job("report").expect("read").expect("exists");
        assert_eq!(job.status, JobState::Active);

        let err = store
            .set_job_active("missing", true, Utc::now())
            .expect_err("unknown job");
        assert!(matches!(err, TrackingError::JobNotFound { .. }));
    }

    #[test]
    fn upsert_definition_keeps_statistics() {
        let (_dir, store) = store();
        let job = store.get_or_create_job("report", Utc::now()).expect("job");
        running(&store, &job, "exec-1", Utc::now());
        store
            .complete_execution("exec-1", &completion(ExecutionStatus::Success, 4))
            .expect("complete");

        let def = JobDefinition {
            name: "report".into(),
            description: Some("Weekly report".into()),
            schedule_type: "weekly".into(),
            schedule_config: Some(r#"{"kind":"weekly"}"#.into()),
            is_active: true,
        };
        let job = store.upsert_job_definition(&def, Utc::now()).expect("upsert");
        assert_eq!(job.schedule_type, "weekly");
        assert_eq!(job.description.as_deref(), Some("Weekly report"));
        assert_eq!(job.total_runs, 1);
        assert_eq!(job.average_duration, Some(4));

        let next = Utc::now() + ChronoDuration::days(7);
        store
            .update_next_run("report", Some(next), Utc::now())
            .expect("next run");
        let job = store.job("report").expect("read").expect("exists");
        assert_eq!(job.next_run.map(fmt_ts), Some(fmt_ts(next)));
    }

    #[test]
    fn retention_deletes_old_executions_with_logs() {
        let (_dir, store) = store();
        let job = store.get_or_create_job("report", Utc::now()).expect("job");
        let old = Utc::now() - ChronoDuration::days(120);
        running(&store, &job, "old", old);
        store
            .append_log("old", LogLevel::Info, "ancient", None, old)
            .expect("log");
        running(&store, &job, "new", Utc::now());

        let (executions, logs) = store
            .delete_executions_before(Utc::now() - ChronoDuration::days(90))
            .expect("cleanup");
        assert_eq!((executions, logs), (1, 1));
        assert!(store.execution("old").expect("read").is_none());
        assert!(store.execution("new").expect("read").is_some());
    }

    #[test]
    fn global_sweep_fails_only_old_running_rows() {
        let (_dir, store) = store();
        let job = store.get_or_create_job("report", Utc::now()).expect("job");
        running(&store, &job, "stuck", Utc::now() - ChronoDuration::hours(3));
        running(&store, &job, "fresh", Utc::now());

        let now = Utc::now();
        let reaped = store
            .fail_stale_executions(now - ChronoDuration::hours(2), now, "swept")
            .expect("sweep");
        assert_eq!(reaped, 1);
        let stuck = store.execution("stuck").expect("read").expect("exists");
        assert_eq!(stuck.status, ExecutionStatus::Failure);
        assert_eq!(stuck.error_message.as_deref(), Some("swept"));
        assert!(stuck.completed_at.is_some());
        let fresh = store.execution("fresh").expect("read").expect("exists");
        assert_eq!(fresh.status, ExecutionStatus::Running);
        // Reaping does not touch the aggregate.
        assert_eq!(store.job("report").expect("read").expect("exists").total_runs, 0);
    }
}
