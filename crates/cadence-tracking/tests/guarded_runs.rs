//! Two runners sharing one database file must never overlap a job.

use std::sync::Arc;
use std::time::Duration;

use cadence_core::config::LockConfig;
use cadence_core::{job_fn, JobArgs, JobError};
use cadence_tracking::{
    ExecutionLock, ExecutionStatus, ExecutionStore, ExecutionTracker, GuardConfig, GuardedRun,
    JobGuard, NoopSampler, SqliteStore, TriggerType,
};
use serde_json::json;

fn runner(path: &std::path::Path) -> JobGuard {
    // Each runner opens its own store, as two processes would.
    let store: Arc<dyn ExecutionStore> = Arc::new(SqliteStore::open(path).expect("open store"));
    let lock = ExecutionLock::new(Arc::clone(&store), &LockConfig::default());
    let tracker = ExecutionTracker::new(store, Arc::new(NoopSampler));
    JobGuard::new(lock, tracker, GuardConfig::default())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlapping_runs_of_one_job_are_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cadence.db");
    let a = runner(&path);
    let b = runner(&path);

    let slow = job_fn(|_args| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok::<_, JobError>(json!({ "done": true }))
    });

    let first = {
        let a = a.clone();
        let slow = Arc::clone(&slow);
        tokio::spawn(async move {
            a.run("weekly-report", TriggerType::Scheduled, JobArgs::default(), &slow)
                .await
        })
    };
    // Give the first runner time to take the lock and insert its row.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = b
        .run("weekly-report", TriggerType::Scheduled, JobArgs::default(), &slow)
        .await
        .expect("second run");
    let first = first.await.expect("join").expect("first run");

    assert!(matches!(first, GuardedRun::Completed(_)));
    assert!(matches!(second, GuardedRun::Skipped(_)));

    let store = SqliteStore::open(&path).expect("reopen");
    let history = store
        .execution_history(Some("weekly-report"), 10)
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ExecutionStatus::Success);

    // Once the first run finished, the other runner may go.
    let third = b
        .run("weekly-report", TriggerType::Scheduled, JobArgs::default(), &slow)
        .await
        .expect("third run");
    assert!(matches!(third, GuardedRun::Completed(_)));
}

#[tokio::test]
async fn crashed_owner_is_reaped_by_the_next_runner() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cadence.db");
    let crashed = runner(&path);
    let survivor = runner(&path);

    // A scope that is never finished nor dropped stands in for a killed process.
    let scope = crashed
        .tracker()
        .begin("weekly-report", Default::default())
        .expect("begin");
    let orphan = scope.execution_id().to_string();
    std::mem::forget(scope);

    let ok = job_fn(|_args| async { Ok::<_, JobError>(json!(null)) });
    let blocked = survivor
        .run("weekly-report", TriggerType::Scheduled, JobArgs::default(), &ok)
        .await
        .expect("run");
    assert!(matches!(blocked, GuardedRun::Skipped(_)));

    // Age the orphan past the 30 minute timeout.
    let conn = rusqlite::Connection::open(&path).expect("open");
    conn.execute(
        "UPDATE job_executions SET started_at = ?1 WHERE execution_id = ?2",
        rusqlite::params![
            cadence_tracking::db::fmt_ts(chrono::Utc::now() - chrono::Duration::minutes(45)),
            orphan
        ],
    )
    .expect("backdate");

    let recovered = survivor
        .run("weekly-report", TriggerType::Scheduled, JobArgs::default(), &ok)
        .await
        .expect("run");
    assert!(matches!(recovered, GuardedRun::Completed(_)));

    let store = SqliteStore::open(&path).expect("reopen");
    let reaped = store.execution(&orphan).expect("read").expect("exists");
    assert_eq!(reaped.status, ExecutionStatus::Failure);
    assert_eq!(
        reaped.error_message.as_deref(),
        Some("Execution timed out and was marked as failed")
    );
    // Reaping leaves the aggregate alone; only the recovered run counted.
    let job = store.job("weekly-report").expect("read").expect("exists");
    assert_eq!(job.total_runs, 1);
}

#[tokio::test]
async fn waiting_on_a_locked_database_leaves_the_runtime_free() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cadence.db");
    let guard = runner(&path);

    // Another process holds the write lock for two seconds.
    let (locked_tx, locked_rx) = std::sync::mpsc::channel();
    let holder = {
        let path = path.clone();
        std::thread::spawn(move || {
            let conn = rusqlite::Connection::open(&path).expect("open");
            conn.execute_batch("BEGIN EXCLUSIVE").expect("begin");
            locked_tx.send(()).expect("signal");
            std::thread::sleep(Duration::from_secs(2));
            conn.execute_batch("COMMIT").expect("commit");
        })
    };
    locked_rx.recv().expect("locked");

    let ok = job_fn(|_args| async { Ok::<_, JobError>(json!({ "done": true })) });
    let run = tokio::spawn(async move {
        guard
            .run("weekly-report", TriggerType::Scheduled, JobArgs::default(), &ok)
            .await
    });

    // This current-thread runtime has one worker; it must keep ticking
    // while the guarded run waits out SQLite's busy timeout.
    let started = std::time::Instant::now();
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(
        started.elapsed() < Duration::from_millis(1_500),
        "runtime stalled for {:?}",
        started.elapsed()
    );
    assert!(!run.is_finished());

    let outcome = run.await.expect("join").expect("run");
    assert!(matches!(outcome, GuardedRun::Completed(_)));
    holder.join().expect("holder");
}
