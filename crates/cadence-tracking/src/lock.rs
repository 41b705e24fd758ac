use std::sync::Arc;

use cadence_core::config::LockConfig;
use chrono::{Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::store::{run_blocking, ExecutionStore, LockRequest};

/// Message written on executions reaped while acquiring a lock.
pub const REAP_MESSAGE: &str = "Execution timed out and was marked as failed";

/// Message written on executions reaped by the periodic sweep.
pub const SWEEP_MESSAGE: &str = "Execution timed out and was automatically marked as failed";

/// Derive the advisory-lock key for a job name.
///
/// First four bytes of SHA-256(name), big-endian, top bit cleared: always in
/// `0..=i32::MAX`, identical across processes and releases.
pub fn lock_token(job_name: &str) -> i64 {
    let digest = Sha256::digest(job_name.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    i64::from(head & 0x7fff_ffff)
}

/// Why a lock attempt did not succeed. Never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BusyReason {
    /// A running execution of this job started inside the lookback window.
    RunningExecution { execution_id: String },
    /// Another holder owns the advisory row for this token.
    HeldElsewhere { holder: String },
}

impl std::fmt::Display for BusyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusyReason::RunningExecution { execution_id } => {
                write!(f, "execution {execution_id} is still running")
            }
            BusyReason::HeldElsewhere { holder } => write!(f, "lock held by {holder}"),
        }
    }
}

#[derive(Debug)]
pub enum LockOutcome {
    Acquired(LockGuard),
    Busy(BusyReason),
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired(_))
    }
}

/// Per-job mutual exclusion across threads and processes sharing one database.
#[derive(Clone)]
pub struct ExecutionLock {
    store: Arc<dyn ExecutionStore>,
    lookback: Duration,
}

impl ExecutionLock {
    pub fn new(store: Arc<dyn ExecutionStore>, config: &LockConfig) -> Self {
        Self {
            store,
            lookback: minutes(config.running_lookback_minutes),
        }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Try to take the lock for `job_name` without blocking.
    ///
    /// Running executions older than `timeout_minutes` are reaped first, so a
    /// crashed owner delays the next run by at most that long.
    pub fn acquire(&self, job_name: &str, timeout_minutes: u64) -> Result<LockOutcome> {
        let now = Utc::now();
        let token = lock_token(job_name);
        let holder = format!("{}:{}", std::process::id(), Uuid::new_v4());
        let attempt = self.store.try_lock(&LockRequest {
            token,
            job_name,
            holder: &holder,
            now,
            stale_before: now - minutes(timeout_minutes),
            busy_since: now - self.lookback,
            reap_message: REAP_MESSAGE,
        })?;

        if attempt.reaped > 0 {
            warn!(job = %job_name, count = attempt.reaped, "reaped stale running executions");
        }

        match attempt.blocked_by {
            None => {
                debug!(job = %job_name, token, %holder, "execution lock acquired");
                Ok(LockOutcome::Acquired(LockGuard {
                    store: Arc::clone(&self.store),
                    job_name: job_name.to_string(),
                    token,
                    holder,
                    released: false,
                }))
            }
            Some(reason) => {
                info!(job = %job_name, %reason, "job already running, skipping");
                Ok(LockOutcome::Busy(reason))
            }
        }
    }

    /// [`acquire`](Self::acquire) on the blocking pool, for async callers.
    pub async fn acquire_async(&self, job_name: &str, timeout_minutes: u64) -> Result<LockOutcome> {
        let lock = self.clone();
        let job_name = job_name.to_string();
        run_blocking(move || lock.acquire(&job_name, timeout_minutes)).await
    }

    /// Fail every running execution (any job) older than `max_age`.
    pub fn sweep_stale_executions(&self, max_age: Duration) -> Result<usize> {
        let now = Utc::now();
        let reaped = self
            .store
            .fail_stale_executions(now - max_age, now, SWEEP_MESSAGE)?;
        if reaped > 0 {
            warn!(count = reaped, "stale executions marked as failed");
        }
        Ok(reaped)
    }

    pub async fn sweep_stale_executions_async(&self, max_age: Duration) -> Result<usize> {
        let lock = self.clone();
        run_blocking(move || lock.sweep_stale_executions(max_age)).await
    }
}

/// Held advisory lock. Released on drop.
///
/// Inside a Tokio runtime the drop-time release runs on the blocking pool.
pub struct LockGuard {
    store: Arc<dyn ExecutionStore>,
    job_name: String,
    token: i64,
    holder: String,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("job_name", &self.job_name)
            .field("token", &self.token)
            .field("holder", &self.holder)
            .finish()
    }
}

impl LockGuard {
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn token(&self) -> i64 {
        self.token
    }

    /// Release now and surface any store error. Dropping does the same silently.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.store.unlock(self.token, &self.holder)?;
        debug!(job = %self.job_name, "execution lock released");
        Ok(())
    }

    /// [`release`](Self::release) on the blocking pool.
    pub async fn release_async(self) -> Result<()> {
        run_blocking(move || self.release()).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let store = Arc::clone(&self.store);
        let job_name = std::mem::take(&mut self.job_name);
        let holder = std::mem::take(&mut self.holder);
        let token = self.token;
        let unlock = move || match store.unlock(token, &holder) {
            Ok(_) => debug!(job = %job_name, "execution lock released"),
            Err(e) => warn!(job = %job_name, "failed to release execution lock: {e}"),
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(unlock);
            }
            Err(_) => unlock(),
        }
    }
}

/// Capped at ten years so `now - window` cannot overflow.
pub(crate) fn minutes(m: u64) -> Duration {
    Duration::minutes(m.min(5_256_000) as i64)
}
