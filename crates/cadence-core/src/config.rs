use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::{TriggerSpec, DEFAULT_TIMEZONE};

pub const DEFAULT_IDLE_CEILING_MS: u64 = 1_000;
pub const DEFAULT_LOCK_TIMEOUT_MINUTES: u64 = 30;
pub const DEFAULT_RUNNING_LOOKBACK_MINUTES: u64 = 60;
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SETTLE_SECS: u64 = 2;
pub const DEFAULT_RETENTION_DAYS: u32 = 90;
pub const DEFAULT_STALE_AFTER_MINUTES: u64 = 120;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Longest the loop sleeps before re-checking the heap.
    #[serde(default = "default_idle_ceiling_ms")]
    pub idle_ceiling_ms: u64,
    /// Offset used by calendar triggers that do not name one.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_ceiling_ms: DEFAULT_IDLE_CEILING_MS,
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// A running execution older than this is presumed orphaned and reaped.
    #[serde(default = "default_lock_timeout_minutes")]
    pub timeout_minutes: u64,
    /// Only running executions started inside this window count as "busy".
    #[serde(default = "default_running_lookback_minutes")]
    pub running_lookback_minutes: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: DEFAULT_LOCK_TIMEOUT_MINUTES,
            running_lookback_minutes: DEFAULT_RUNNING_LOOKBACK_MINUTES,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Extra attempts after a failed run, recorded with trigger_type = retry.
    #[serde(default)]
    pub max_retries: u32,
    /// Skip CPU/memory sampling entirely.
    #[serde(default)]
    pub disable_resource_sampling: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_state_path")]
    pub state_path: String,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            settle_secs: DEFAULT_SETTLE_SECS,
        }
    }
}

/// Housekeeping jobs registered by the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_retention_days")]
    pub days_to_keep: u32,
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            days_to_keep: DEFAULT_RETENTION_DAYS,
            stale_after_minutes: DEFAULT_STALE_AFTER_MINUTES,
        }
    }
}

/// A configured job: an external program run on a trigger.
///
/// Job code never runs inside the scheduler process; each run spawns
/// `command` with `args` as a child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger: TriggerSpec,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default = "default_command_timeout_secs")]
    pub timeout_secs: u64,
    /// Per-job override of `lock.timeout_minutes`.
    #[serde(default)]
    pub lock_timeout_minutes: Option<u64>,
    #[serde(default = "bool_true")]
    pub active: bool,
}

fn bool_true() -> bool {
    true
}
fn default_idle_ceiling_ms() -> u64 {
    DEFAULT_IDLE_CEILING_MS
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_lock_timeout_minutes() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MINUTES
}
fn default_running_lookback_minutes() -> u64 {
    DEFAULT_RUNNING_LOOKBACK_MINUTES
}
fn default_stop_timeout_secs() -> u64 {
    DEFAULT_STOP_TIMEOUT_SECS
}
fn default_settle_secs() -> u64 {
    DEFAULT_SETTLE_SECS
}
fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}
fn default_stale_after_minutes() -> u64 {
    DEFAULT_STALE_AFTER_MINUTES
}
fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

fn data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence", home)
}
fn default_db_path() -> String {
    format!("{}/cadence.db", data_dir())
}
fn default_state_path() -> String {
    format!("{}/runner-state.json", data_dir())
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Nested keys use a double underscore: `CADENCE_LOCK__TIMEOUT_MINUTES=45`.
    /// A missing file is not an error; defaults apply.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CadenceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        for job in &config.jobs {
            job.trigger.validate().map_err(|e| {
                crate::error::CoreError::Config(format!("job {:?}: {e}", job.name))
            })?;
        }

        Ok(config)
    }

    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

fn default_config_path() -> String {
    format!("{}/cadence.toml", data_dir())
}
