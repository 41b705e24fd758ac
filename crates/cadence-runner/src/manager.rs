//! `RunnerLifecycleManager`: hosts the scheduler loop on a dedicated OS
//! thread with its own Tokio runtime, and mirrors its lifecycle into the
//! runner state file.

use std::sync::{Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cadence_core::config::CadenceConfig;
use cadence_scheduler::{ScheduledJobStatus, Scheduler};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{Result, RunnerError};
use crate::jobs;
use crate::service::Services;
use crate::state::{process_alive, RunnerState, RunnerStatus, StateFile};

/// Name of the OS thread that drives the scheduler.
pub const THREAD_NAME: &str = "cadence-runner";

/// Grace period for in-flight jobs once the loop has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct RunnerHandle {
    thread: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    scheduler: Scheduler,
}

impl RunnerHandle {
    fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }
}

/// Result of [`RunnerLifecycleManager::status`].
#[derive(Debug, Clone, Serialize)]
pub struct RunnerReport {
    pub status: RunnerStatus,
    /// Whether this process owns a live runner thread.
    pub thread_alive: bool,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Scheduler entries, only known to the owning process.
    pub jobs: Vec<ScheduledJobStatus>,
}

/// Result of [`RunnerLifecycleManager::health_check`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub thread_exists: bool,
    pub thread_alive: bool,
    pub persisted_status: RunnerStatus,
    pub scheduled_jobs: usize,
    pub in_flight: usize,
}

pub struct RunnerLifecycleManager {
    config: CadenceConfig,
    services: Services,
    state: StateFile,
    handle: Mutex<Option<RunnerHandle>>,
}

impl RunnerLifecycleManager {
    pub fn new(config: CadenceConfig, services: Services) -> Self {
        let state = StateFile::new(&config.runner.state_path);
        Self {
            config,
            services,
            state,
            handle: Mutex::new(None),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn state_file(&self) -> &StateFile {
        &self.state
    }

    /// Start the runner thread. Returns `false` if it is already running.
    pub fn start(&self) -> Result<bool> {
        let mut handle = self.lock_handle();
        if handle.as_ref().is_some_and(RunnerHandle::is_alive) {
            info!("runner already running");
            return Ok(false);
        }
        let persisted = self.state.load();
        if persisted.status == RunnerStatus::Running && self.owned_elsewhere(&persisted) {
            warn!(pid = ?persisted.pid, "runner already running in another process");
            return Ok(false);
        }
        if let Some(dead) = handle.take() {
            // Thread exited on its own; reap it before starting a new one.
            let _ = dead.thread.join();
        }

        let scheduler = Scheduler::new(&self.config.scheduler)?;
        let entries = jobs::catalogue(&self.config, &self.services)?;
        let registered = jobs::register_jobs(&scheduler, &self.services, entries)?;

        let (shutdown, rx) = watch::channel(false);
        let loop_scheduler = scheduler.clone();
        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || drive(loop_scheduler, rx))
            .map_err(|e| {
                scheduler.clear();
                RunnerError::Thread(e.to_string())
            })?;

        *handle = Some(RunnerHandle {
            thread,
            shutdown,
            scheduler,
        });
        self.state.save(&RunnerState::running(Utc::now()))?;
        info!(jobs = registered.len(), "runner started");
        Ok(true)
    }

    /// Signal the loop and wait up to `runner.stop_timeout_secs` for the
    /// thread. Returns `false` if no runner was running.
    pub fn stop(&self) -> Result<bool> {
        let Some(runner) = self.lock_handle().take() else {
            info!("runner not running");
            self.heal_state();
            return Ok(false);
        };

        let _ = runner.shutdown.send(true);
        let timeout = Duration::from_secs(self.config.runner.stop_timeout_secs);
        let deadline = Instant::now() + timeout;
        while runner.is_alive() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        if runner.is_alive() {
            warn!(timeout_secs = timeout.as_secs(), "runner thread did not stop in time; detaching");
            runner.scheduler.clear();
        } else if runner.thread.join().is_err() {
            error!("runner thread panicked");
        }

        let stopped = self.state.load().stopped(Utc::now());
        self.state.save(&stopped)?;
        info!("runner stopped");
        Ok(true)
    }

    /// `stop()`, settle delay, `start()`.
    pub fn restart(&self) -> Result<bool> {
        self.stop()?;
        std::thread::sleep(Duration::from_secs(self.config.runner.settle_secs));
        self.start()
    }

    /// Persisted state reconciled with reality.
    ///
    /// A `running` record whose thread (in this process) or owning process
    /// (elsewhere) is gone is rewritten to `stopped`.
    pub fn status(&self) -> Result<RunnerReport> {
        let handle = self.lock_handle();
        let alive = handle.as_ref().is_some_and(RunnerHandle::is_alive);
        let mut state = self.state.load();

        if state.status == RunnerStatus::Running && !alive && !self.owned_elsewhere(&state) {
            warn!("runner state says running but the runner is gone; marking stopped");
            state = state.stopped(Utc::now());
            self.state.save(&state)?;
        }

        let jobs = match handle.as_ref() {
            Some(runner) if alive => runner.scheduler.list(),
            _ => Vec::new(),
        };
        Ok(RunnerReport {
            status: state.status,
            thread_alive: alive,
            pid: state.pid,
            started_at: state.started_at,
            stopped_at: state.stopped_at,
            jobs,
        })
    }

    pub fn health_check(&self) -> HealthReport {
        let handle = self.lock_handle();
        let thread_exists = handle.is_some();
        let thread_alive = handle.as_ref().is_some_and(RunnerHandle::is_alive);
        let (scheduled_jobs, in_flight) = handle
            .as_ref()
            .map(|r| (r.scheduler.len(), r.scheduler.in_flight()))
            .unwrap_or((0, 0));
        let persisted_status = self.state.load().status;
        HealthReport {
            healthy: thread_alive && persisted_status == RunnerStatus::Running,
            thread_exists,
            thread_alive,
            persisted_status,
            scheduled_jobs,
            in_flight,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_handle()
            .as_ref()
            .is_some_and(RunnerHandle::is_alive)
    }

    /// The live scheduler, if the runner is running in this process.
    pub fn scheduler(&self) -> Option<Scheduler> {
        self.lock_handle()
            .as_ref()
            .filter(|r| r.is_alive())
            .map(|r| r.scheduler.clone())
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<RunnerHandle>> {
        self.handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether `state` belongs to another live process.
    fn owned_elsewhere(&self, state: &RunnerState) -> bool {
        match state.pid {
            Some(pid) if pid != std::process::id() => process_alive(pid),
            _ => false,
        }
    }

    fn heal_state(&self) {
        let state = self.state.load();
        if state.status == RunnerStatus::Running && !self.owned_elsewhere(&state) {
            if let Err(e) = self.state.save(&state.stopped(Utc::now())) {
                warn!("failed to rewrite runner state: {e}");
            }
        }
    }
}

impl Drop for RunnerLifecycleManager {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!("failed to stop runner on drop: {e}");
            }
        }
    }
}

/// Body of the runner thread.
fn drive(scheduler: Scheduler, shutdown: watch::Receiver<bool>) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("cadence-worker")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to build runner runtime: {e}");
            scheduler.clear();
            return;
        }
    };

    runtime.block_on(async {
        scheduler.clone().run(shutdown).await;
        if !scheduler.drain(DRAIN_TIMEOUT).await {
            warn!(
                in_flight = scheduler.in_flight(),
                "jobs still running at shutdown; abandoning them"
            );
        }
    });
    // Entries hold scheduler handles through their job wrappers.
    scheduler.clear();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use cadence_tracking::{ExecutionStore, SqliteStore};

    fn manager(dir: &tempfile::TempDir) -> RunnerLifecycleManager {
        let mut config = CadenceConfig::default();
        config.database.path = dir.path().join("cadence.db").display().to_string();
        config.runner.state_path = dir.path().join("runner-state.json").display().to_string();
        config.runner.settle_secs = 0;
        let store: Arc<dyn ExecutionStore> =
            Arc::new(SqliteStore::open(&config.database.path).expect("store"));
        let services = Services::with_store(store, &config);
        RunnerLifecycleManager::new(config, services)
    }

    #[test]
    fn start_stop_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = manager(&dir);

        assert!(runner.start().expect("start"));
        assert!(!runner.start().expect("second start"));
        assert!(runner.is_running());
        assert_eq!(runner.state_file().load().status, RunnerStatus::Running);

        let report = runner.status().expect("status");
        assert!(report.thread_alive);
        let names: Vec<_> = report.jobs.iter().map(|j| j.name.as_str()).collect();
        assert!(names.contains(&jobs::RETENTION_JOB));
        assert!(names.contains(&jobs::STALE_SWEEP_JOB));

        let health = runner.health_check();
        assert!(health.healthy);
        assert_eq!(health.scheduled_jobs, 2);

        assert!(runner.stop().expect("stop"));
        assert!(!runner.stop().expect("second stop"));
        assert!(!runner.is_running());
        assert_eq!(runner.state_file().load().status, RunnerStatus::Stopped);
        assert!(!runner.health_check().healthy);
    }

    #[test]
    fn restart_gives_a_fresh_thread() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = manager(&dir);
        runner.start().expect("start");
        assert!(runner.restart().expect("restart"));
        assert!(runner.is_running());
        assert_eq!(runner.health_check().scheduled_jobs, 2);
        runner.stop().expect("stop");
    }

    #[test]
    fn stale_running_flag_is_healed_on_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = manager(&dir);
        // Left behind by an earlier incarnation of this process.
        runner
            .state_file()
            .save(&RunnerState::running(Utc::now()))
            .expect("save");

        let report = runner.status().expect("status");
        assert_eq!(report.status, RunnerStatus::Stopped);
        assert!(!report.thread_alive);
        assert_eq!(runner.state_file().load().status, RunnerStatus::Stopped);
    }

    #[test]
    fn live_foreign_owner_is_left_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = manager(&dir);
        // pid 1 always exists on a running Unix host.
        let mut state = RunnerState::running(Utc::now());
        state.pid = Some(1);
        runner.state_file().save(&state).expect("save");

        let report = runner.status().expect("status");
        assert_eq!(report.status, RunnerStatus::Running);
        assert_eq!(report.pid, Some(1));
        assert!(report.jobs.is_empty());
        assert!(!runner.start().expect("start"));
        assert!(!runner.is_running());
    }
}
