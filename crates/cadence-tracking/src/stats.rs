//! Read-side reports over jobs and executions.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::store::ExecutionStore;
use crate::types::{ExecutionRecord, ExecutionStatus, JobRecord, JobState};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatistics {
    pub name: String,
    pub status: JobState,
    pub is_active: bool,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub success_rate: f64,
    pub average_duration: Option<i64>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobStatistics {
    fn from(job: &JobRecord) -> Self {
        Self {
            name: job.name.clone(),
            status: job.status,
            is_active: job.is_active,
            total_runs: job.total_runs,
            successful_runs: job.successful_runs,
            failed_runs: job.failed_runs,
            success_rate: job.success_rate(),
            average_duration: job.average_duration,
            last_run: job.last_run,
            last_success: job.last_success,
            last_failure: job.last_failure,
            last_error_message: job.last_error_message.clone(),
            next_run: job.next_run,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverallStatistics {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub error_jobs: usize,
    pub disabled_jobs: usize,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub success_rate: f64,
}

/// Totals across all jobs.
pub fn overall_statistics(jobs: &[JobRecord]) -> OverallStatistics {
    let mut stats = OverallStatistics {
        total_jobs: jobs.len(),
        ..OverallStatistics::default()
    };
    for job in jobs {
        match job.status {
            JobState::Active => stats.active_jobs += 1,
            JobState::Error => stats.error_jobs += 1,
            JobState::Disabled => stats.disabled_jobs += 1,
        }
        stats.total_runs += job.total_runs;
        stats.successful_runs += job.successful_runs;
        stats.failed_runs += job.failed_runs;
    }
    stats.success_rate = percent(stats.successful_runs, stats.total_runs);
    stats
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPerformance {
    pub job_name: String,
    pub total_executions: i64,
    pub successful: i64,
    pub failed: i64,
    pub running: i64,
    pub success_rate: f64,
    /// Arithmetic mean over executions with a recorded duration.
    pub average_duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub days: u32,
    pub since: DateTime<Utc>,
    pub jobs: Vec<JobPerformance>,
}

/// Per-job metrics over `executions`, sorted by job name.
pub fn performance_metrics(
    executions: &[ExecutionRecord],
    days: u32,
    since: DateTime<Utc>,
) -> PerformanceMetrics {
    #[derive(Default)]
    struct Acc {
        total: i64,
        successful: i64,
        failed: i64,
        running: i64,
        duration_sum: i64,
        duration_count: i64,
    }

    let mut by_job: BTreeMap<&str, Acc> = BTreeMap::new();
    for exec in executions {
        let acc = by_job.entry(exec.job_name.as_str()).or_default();
        acc.total += 1;
        match exec.status {
            ExecutionStatus::Success => acc.successful += 1,
            ExecutionStatus::Failure => acc.failed += 1,
            ExecutionStatus::Running => acc.running += 1,
        }
        if let Some(d) = exec.duration {
            acc.duration_sum += d;
            acc.duration_count += 1;
        }
    }

    let jobs = by_job
        .into_iter()
        .map(|(name, acc)| JobPerformance {
            job_name: name.to_string(),
            total_executions: acc.total,
            successful: acc.successful,
            failed: acc.failed,
            running: acc.running,
            success_rate: percent(acc.successful, acc.total),
            average_duration: (acc.duration_count > 0)
                .then(|| acc.duration_sum as f64 / acc.duration_count as f64),
        })
        .collect();

    PerformanceMetrics { days, since, jobs }
}

/// Load and compute metrics for the last `days` days.
pub fn load_performance_metrics(
    store: &dyn ExecutionStore,
    days: u32,
) -> Result<PerformanceMetrics> {
    let since = Utc::now() - Duration::days(i64::from(days));
    let executions = store.executions_since(since)?;
    Ok(performance_metrics(&executions, days, since))
}

/// Statistics for one job, `None` if it has never been seen.
pub fn job_statistics(store: &dyn ExecutionStore, name: &str) -> Result<Option<JobStatistics>> {
    Ok(store.job(name)?.as_ref().map(JobStatistics::from))
}

fn percent(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
