//! A real runner thread firing a configured command job on an interval.

use std::time::{Duration, Instant};

use cadence_core::config::{CadenceConfig, JobConfig};
use cadence_core::TriggerSpec;
use cadence_runner::{RunnerLifecycleManager, RunnerStatus, Services};
use cadence_tracking::{ExecutionStatus, TriggerType};

fn config(dir: &tempfile::TempDir, script: &str) -> CadenceConfig {
    let mut config = CadenceConfig::default();
    config.database.path = dir.path().join("cadence.db").display().to_string();
    config.runner.state_path = dir.path().join("runner-state.json").display().to_string();
    config.retention.enabled = false;
    config.scheduler.idle_ceiling_ms = 100;
    config.jobs = vec![JobConfig {
        name: "heartbeat".to_string(),
        description: None,
        trigger: TriggerSpec::Interval {
            delay_seconds: 0,
            repeat_seconds: Some(1),
        },
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        working_dir: None,
        timeout_secs: 10,
        lock_timeout_minutes: None,
        active: true,
    }];
    config
}

#[test]
fn interval_job_runs_tracked_and_stops_cleanly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir, "echo beat");
    let services = Services::open(&config).expect("services");
    let store = services.store.clone();
    let runner = RunnerLifecycleManager::new(config, services);

    assert!(runner.start().expect("start"));
    std::thread::sleep(Duration::from_millis(2_500));
    assert!(runner.stop().expect("stop"));
    assert_eq!(runner.status().expect("status").status, RunnerStatus::Stopped);

    let history = store.execution_history(Some("heartbeat"), 50).expect("history");
    assert!(history.len() >= 2, "expected repeated runs, got {}", history.len());
    assert!(history.iter().all(|e| e.status == ExecutionStatus::Success));
    assert!(history.iter().all(|e| e.trigger_type == TriggerType::Scheduled));

    let job = store.job("heartbeat").expect("read").expect("row");
    assert_eq!(job.total_runs, history.len() as i64);
    assert_eq!(job.schedule_type, "interval");
    assert!(job.next_run.is_some());
}

#[test]
fn slow_job_never_overlaps_itself() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir, "sleep 2");
    let services = Services::open(&config).expect("services");
    let store = services.store.clone();
    let runner = RunnerLifecycleManager::new(config, services);

    runner.start().expect("start");
    std::thread::sleep(Duration::from_millis(3_500));
    runner.stop().expect("stop");

    let mut history = store.execution_history(Some("heartbeat"), 50).expect("history");
    history.reverse();
    assert!(!history.is_empty());
    // Fires every second, but each run takes two: at most two runs fit.
    assert!(history.len() <= 2, "overlapping runs: {}", history.len());
    for pair in history.windows(2) {
        let earlier_end = pair[0].completed_at.expect("completed");
        assert!(pair[1].started_at >= earlier_end);
    }
}

#[test]
fn stop_detaches_a_thread_that_outlives_the_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config(&dir, "sleep 3");
    config.runner.stop_timeout_secs = 0;
    let services = Services::open(&config).expect("services");
    let store = services.store.clone();
    let runner = RunnerLifecycleManager::new(config, services);

    runner.start().expect("start");
    let deadline = Instant::now() + Duration::from_secs(2);
    while runner.health_check().in_flight == 0 {
        assert!(Instant::now() < deadline, "job never fired");
        std::thread::sleep(Duration::from_millis(20));
    }

    // The thread is still draining the slow job, so stop gives up at once.
    let stopping = Instant::now();
    assert!(runner.stop().expect("stop"));
    assert!(stopping.elapsed() < Duration::from_secs(1));
    assert!(!runner.is_running());
    assert!(!runner.health_check().thread_exists);
    assert_eq!(runner.status().expect("status").status, RunnerStatus::Stopped);

    // The detached thread still lets the in-flight run finish and record itself.
    std::thread::sleep(Duration::from_millis(4_000));
    let history = store.execution_history(Some("heartbeat"), 10).expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ExecutionStatus::Success);
}
