use std::sync::Arc;

use cadence_core::config::CadenceConfig;
use cadence_tracking::{
    ExecutionLock, ExecutionStore, ExecutionTracker, GuardConfig, JobGuard, SqliteStore,
};
use tracing::info;

use crate::error::Result;

/// The tracking stack built once from configuration and shared by the
/// runner thread and the CLI commands.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn ExecutionStore>,
    pub lock: ExecutionLock,
    pub tracker: ExecutionTracker,
    pub guard: JobGuard,
}

impl Services {
    /// Open (and migrate) the configured SQLite database.
    pub fn open(config: &CadenceConfig) -> Result<Self> {
        info!(path = %config.database.path, "opening SQLite database");
        let store: Arc<dyn ExecutionStore> = Arc::new(SqliteStore::open(&config.database.path)?);
        Ok(Self::with_store(store, config))
    }

    pub fn with_store(store: Arc<dyn ExecutionStore>, config: &CadenceConfig) -> Self {
        let lock = ExecutionLock::new(Arc::clone(&store), &config.lock);
        let tracker = ExecutionTracker::from_config(Arc::clone(&store), &config.tracking);
        let guard = JobGuard::new(
            lock.clone(),
            tracker.clone(),
            GuardConfig::new(&config.lock, &config.tracking),
        );
        Self {
            store,
            lock,
            tracker,
            guard,
        }
    }
}
