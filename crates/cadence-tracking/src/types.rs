use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal or in-flight state of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failure,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "failure" => Ok(ExecutionStatus::Failure),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// What caused an execution to start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Scheduled,
    Manual,
    Retry,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerType::Scheduled => "scheduled",
            TriggerType::Manual => "manual",
            TriggerType::Retry => "retry",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TriggerType::Scheduled),
            "manual" => Ok(TriggerType::Manual),
            "retry" => Ok(TriggerType::Retry),
            other => Err(format!("unknown trigger type: {other}")),
        }
    }
}

/// Derived health of a job aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Active,
    Error,
    Disabled,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Active => "active",
            JobState::Error => "error",
            JobState::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(JobState::Active),
            "error" => Ok(JobState::Error),
            "disabled" => Ok(JobState::Disabled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Severity of an execution log line. Stored upper-cased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// A persisted job aggregate (one row per distinct job name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// `"auto"` for jobs created lazily by the tracker.
    pub schedule_type: String,
    /// Opaque JSON describing the trigger, when registered from config.
    pub schedule_config: Option<String>,
    pub is_active: bool,
    pub status: JobState,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    /// Decaying average in whole seconds; see [`decayed_average`].
    pub average_duration: Option<i64>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of one finished execution, as applied to its job aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub succeeded: bool,
    pub duration_secs: i64,
    pub completed_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

/// `average = None ? duration : (average + duration) / 2`, integer division.
///
/// This weights recent runs more heavily than old ones; it is not an
/// arithmetic mean and stored statistics depend on it staying this way.
pub fn decayed_average(previous: Option<i64>, duration_secs: i64) -> i64 {
    match previous {
        None => duration_secs,
        Some(avg) => (avg + duration_secs) / 2,
    }
}

impl JobRecord {
    /// Fold one execution outcome into the aggregate counters.
    pub fn apply_outcome(&mut self, outcome: &RunOutcome) {
        self.total_runs += 1;
        if outcome.succeeded {
            self.successful_runs += 1;
            self.last_success = Some(outcome.completed_at);
        } else {
            self.failed_runs += 1;
            self.last_failure = Some(outcome.completed_at);
            self.last_error_message = outcome.error_message.clone();
        }
        self.last_run = Some(outcome.completed_at);
        self.average_duration = Some(decayed_average(
            self.average_duration,
            outcome.duration_secs,
        ));

        if !self.is_active {
            self.status = JobState::Disabled;
        } else if self.failed_runs > 0 && self.successful_runs == 0 {
            self.status = JobState::Error;
        } else if outcome.succeeded {
            self.status = JobState::Active;
        }
        self.updated_at = outcome.completed_at;
    }

    /// Percentage of successful runs, 0 when the job never ran.
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.successful_runs as f64 / self.total_runs as f64 * 100.0
        }
    }
}

/// Registration data written when a configured job is synced to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: String,
    pub description: Option<String>,
    pub schedule_type: String,
    pub schedule_config: Option<String>,
    pub is_active: bool,
}

/// One run attempt of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub job_id: i64,
    pub job_name: String,
    pub scheduled_time: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub status: ExecutionStatus,
    pub trigger_type: TriggerType,
    pub triggered_by: Option<i64>,
    pub retry_count: u32,
    pub parent_execution_id: Option<String>,
    pub cpu_usage_start: Option<f64>,
    pub cpu_usage_end: Option<f64>,
    pub memory_usage_start: Option<f64>,
    pub memory_usage_end: Option<f64>,
    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
    pub result_data: Option<serde_json::Value>,
}

/// Row inserted at tracker entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
    pub execution_id: String,
    pub job_id: i64,
    pub scheduled_time: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub trigger_type: TriggerType,
    pub triggered_by: Option<i64>,
    pub retry_count: u32,
    pub parent_execution_id: Option<String>,
    pub cpu_usage_start: Option<f64>,
    pub memory_usage_start: Option<f64>,
}

/// Terminal transition written at tracker exit.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionCompletion {
    pub completed_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
    pub cpu_usage_end: Option<f64>,
    pub memory_usage_end: Option<f64>,
    /// `None` keeps whatever result data is already stored.
    pub result_data: Option<serde_json::Value>,
}

/// Append-only log line attached to an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: i64,
    pub execution_id: String,
    pub log_level: LogLevel,
    pub message: String,
    pub source: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fresh_job() -> JobRecord {
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        JobRecord {
            id: 1,
            name: "weekly-report".into(),
            description: None,
            schedule_type: "auto".into(),
            schedule_config: None,
            is_active: true,
            status: JobState::Active,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            average_duration: None,
            last_run: None,
            last_success: None,
            last_failure: None,
            last_error_message: None,
            next_run: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn outcome(succeeded: bool, duration_secs: i64) -> RunOutcome {
        RunOutcome {
            succeeded,
            duration_secs,
            completed_at: Utc.with_ymd_and_hms(2026, 1, 2, 10, 0, 0).unwrap(),
            error_message: (!succeeded).then(|| "smtp refused".to_string()),
        }
    }

    #[test]
    fn decayed_average_follows_exact_formula() {
        let d1 = 10;
        let d2 = 20;
        let d3 = 40;
        let a1 = decayed_average(None, d1);
        assert_eq!(a1, d1);
        let a2 = decayed_average(Some(a1), d2);
        assert_eq!(a2, (d1 + d2) / 2);
        let a3 = decayed_average(Some(a2), d3);
        assert_eq!(a3, ((d1 + d2) / 2 + d3) / 2);
        // Not the arithmetic mean (23).
        assert_eq!(a3, 27);
    }

    #[test]
    fn successful_runs_update_counters_and_average() {
        let mut job = fresh_job();
        job.apply_outcome(&outcome(true, 10));
        job.apply_outcome(&outcome(true, 20));
        assert_eq!(job.total_runs, 2);
        assert_eq!(job.successful_runs, 2);
        assert_eq!(job.failed_runs, 0);
        assert_eq!(job.average_duration, Some(15));
        assert_eq!(job.last_success, job.last_run);
        assert_eq!(job.status, JobState::Active);
    }

    #[test]
    fn failures_without_any_success_mark_job_as_error() {
        let mut job = fresh_job();
        job.apply_outcome(&outcome(false, 3));
        assert_eq!(job.status, JobState::Error);
        assert_eq!(job.failed_runs, 1);
        assert_eq!(job.last_error_message.as_deref(), Some("smtp refused"));
        assert_eq!(job.last_failure, job.last_run);

        job.apply_outcome(&outcome(true, 5));
        assert_eq!(job.status, JobState::Active);
        assert_eq!(job.successful_runs, 1);
    }

    #[test]
    fn failure_after_a_success_keeps_job_active() {
        let mut job = fresh_job();
        job.apply_outcome(&outcome(true, 5));
        job.apply_outcome(&outcome(false, 5));
        assert_eq!(job.status, JobState::Active);
        assert_eq!(job.total_runs, 2);
    }

    #[test]
    fn disabled_job_stays_disabled_after_a_run() {
        let mut job = fresh_job();
        job.is_active = false;
        job.status = JobState::Disabled;
        job.apply_outcome(&outcome(true, 5));
        assert_eq!(job.status, JobState::Disabled);
        assert_eq!(job.successful_runs, 1);
    }

    #[test]
    fn success_rate_handles_zero_runs() {
        let mut job = fresh_job();
        assert_eq!(job.success_rate(), 0.0);
        job.apply_outcome(&outcome(true, 1));
        job.apply_outcome(&outcome(false, 1));
        assert_eq!(job.success_rate(), 50.0);
    }

    #[test]
    fn status_strings_round_trip() {
        for s in ["running", "success", "failure"] {
            assert_eq!(s.parse::<ExecutionStatus>().unwrap().to_string(), s);
        }
        for s in ["scheduled", "manual", "retry"] {
            assert_eq!(s.parse::<TriggerType>().unwrap().to_string(), s);
        }
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert!("cancelled".parse::<ExecutionStatus>().is_err());
    }
}
