//! Persisted runner state: a small JSON file that outlives the process.
//!
//! The file is advisory. The in-process thread is the source of truth for
//! the process that owns it; other processes (e.g. `cadence status`) check
//! whether the recorded pid is still alive.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Running,
    #[default]
    Stopped,
}

impl fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerStatus::Running => write!(f, "running"),
            RunnerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerState {
    pub status: RunnerStatus,
    /// Process that owns the runner thread while `status` is `running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RunnerState {
    pub fn running(now: DateTime<Utc>) -> Self {
        Self {
            status: RunnerStatus::Running,
            pid: Some(std::process::id()),
            started_at: Some(now),
            stopped_at: None,
            updated_at: Some(now),
        }
    }

    /// This state moved to `stopped` at `now`, keeping `started_at`.
    pub fn stopped(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: RunnerStatus::Stopped,
            pid: None,
            started_at: self.started_at,
            stopped_at: Some(now),
            updated_at: Some(now),
        }
    }

    pub fn owned_by_this_process(&self) -> bool {
        self.pid == Some(std::process::id())
    }
}

/// JSON file holding a [`RunnerState`].
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state. A missing or unreadable file reads as `stopped`.
    pub fn load(&self) -> RunnerState {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return RunnerState::default(),
            Err(e) => {
                warn!(path = %self.path.display(), "cannot read runner state: {e}");
                return RunnerState::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), "corrupt runner state, treating as stopped: {e}");
            RunnerState::default()
        })
    }

    /// Write the state as pretty JSON via a temp file and rename.
    pub fn save(&self, state: &RunnerState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Whether a process with `pid` currently exists on this host.
pub fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).is_some()
}
