use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cadence_core::config::SchedulerConfig;
use cadence_core::types::parse_utc_offset;
use cadence_core::{JobArgs, JobFn, TriggerSpec};
use chrono::{DateTime, FixedOffset, Utc};
use futures_util::FutureExt;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    queue::FireQueue,
    recurrence,
    types::{ScheduledJobId, ScheduledJobStatus, Trigger, WEEK},
};

struct Entry {
    name: String,
    trigger: Trigger,
    job: JobFn,
    run_at: Instant,
    /// Bumped by `reschedule`; queue items carrying an older value are ignored.
    generation: u64,
    /// Last wall-clock slot a custom trigger produced.
    target: Option<DateTime<Utc>>,
    run_count: u64,
    error_count: u64,
    last_error: Option<String>,
    last_run: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    entries: HashMap<ScheduledJobId, Entry>,
    queue: FireQueue<(ScheduledJobId, u64)>,
}

struct Shared {
    state: Mutex<State>,
    wake: Notify,
    idle_ceiling: Duration,
    default_offset: FixedOffset,
    running: AtomicBool,
    in_flight: AtomicUsize,
}

/// In-memory timer engine.
///
/// Entries live in a min-heap keyed by monotonic fire time. The loop sleeps
/// until the earliest entry (at most `idle_ceiling`), fires everything due on
/// its own Tokio task, and reinserts repeating entries. Cheap to clone; all
/// clones drive the same heap.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

enum NextRun {
    At(Instant, Option<DateTime<Utc>>),
    Retire,
    Panicked(String),
}

struct Due {
    id: ScheduledJobId,
    generation: u64,
    run_at: Instant,
    target: Option<DateTime<Utc>>,
    name: String,
    trigger: Trigger,
    job: JobFn,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        let default_offset = parse_utc_offset(&config.timezone)?;
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                wake: Notify::new(),
                idle_ceiling: Duration::from_millis(config.idle_ceiling_ms.max(1)),
                default_offset,
                running: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
            }),
        })
    }

    pub fn default_offset(&self) -> FixedOffset {
        self.shared.default_offset
    }

    /// Add a job. Wakes the loop so an earlier fire time is honoured at once.
    pub fn schedule(
        &self,
        name: impl Into<String>,
        trigger: Trigger,
        job: JobFn,
    ) -> Result<ScheduledJobId> {
        let name = name.into();
        let now = Instant::now();
        let (run_at, target) = first_run_at(&trigger, now)?;
        let id = ScheduledJobId::new();
        let kind = trigger.kind();

        {
            let mut state = self.state();
            state.queue.push(run_at, (id, 0));
            state.entries.insert(
                id,
                Entry {
                    name: name.clone(),
                    trigger,
                    job,
                    run_at,
                    generation: 0,
                    target,
                    run_count: 0,
                    error_count: 0,
                    last_error: None,
                    last_run: None,
                    created_at: Utc::now(),
                },
            );
        }
        self.shared.wake.notify_one();

        info!(job = %name, %id, kind, "job scheduled");
        Ok(id)
    }

    /// Compile `spec` with the configured default offset and schedule it.
    pub fn schedule_spec(
        &self,
        name: impl Into<String>,
        spec: &TriggerSpec,
        job: JobFn,
    ) -> Result<ScheduledJobId> {
        let trigger = Trigger::from_spec(spec, self.shared.default_offset)?;
        self.schedule(name, trigger, job)
    }

    /// Remove an entry. Runs already in flight are not cancelled.
    pub fn cancel(&self, id: ScheduledJobId) -> Result<()> {
        let mut state = self.state();
        let entry = state
            .entries
            .remove(&id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        state.queue.retain(|(queued, _)| *queued != id);
        info!(job = %entry.name, %id, "job cancelled");
        Ok(())
    }

    /// Move the next fire of `id` to `delay` from now. Later fires follow the
    /// entry's trigger as usual.
    pub fn reschedule(&self, id: ScheduledJobId, delay: Duration) -> Result<()> {
        let run_at = Instant::now() + delay;
        {
            let mut state = self.state();
            let state = &mut *state;
            let entry = state
                .entries
                .get_mut(&id)
                .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
            entry.generation += 1;
            entry.run_at = run_at;
            let generation = entry.generation;
            state.queue.retain(|(queued, _)| *queued != id);
            state.queue.push(run_at, (id, generation));
        }
        self.shared.wake.notify_one();
        debug!(%id, ?delay, "job rescheduled");
        Ok(())
    }

    pub fn job_status(&self, id: ScheduledJobId) -> Result<ScheduledJobStatus> {
        let state = self.state();
        let entry = state
            .entries
            .get(&id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        Ok(snapshot(id, entry, Instant::now(), Utc::now()))
    }

    /// Snapshots of every entry, soonest first.
    pub fn list(&self) -> Vec<ScheduledJobStatus> {
        let now = Instant::now();
        let wall = Utc::now();
        let state = self.state();
        let mut jobs: Vec<_> = state
            .entries
            .iter()
            .map(|(id, entry)| snapshot(*id, entry, now, wall))
            .collect();
        jobs.sort_by(|a, b| a.next_run.cmp(&b.next_run).then_with(|| a.name.cmp(&b.name)));
        jobs
    }

    pub fn clear(&self) {
        let mut state = self.state();
        let removed = state.entries.len();
        state.entries.clear();
        state.queue.clear();
        info!(removed, "scheduler cleared");
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Job tasks fired but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Fire everything due now and reinsert repeating entries.
    ///
    /// Returns the number of jobs fired. Must run inside a Tokio runtime.
    pub fn tick(&self) -> usize {
        let now = Instant::now();
        let due = self.pop_due(now);

        for d in &due {
            self.fire(d.id, d.name.clone(), Arc::clone(&d.job));
        }

        // Next-run callbacks run without the state lock held.
        let planned: Vec<_> = due
            .iter()
            .map(|d| (d, next_run_at(&d.trigger, d.run_at, d.target, now)))
            .collect();

        let mut state = self.state();
        let state = &mut *state;
        for (d, next) in planned {
            let current = matches!(
                state.entries.get(&d.id),
                Some(entry) if entry.generation == d.generation
            );
            if !current {
                // Cancelled or rescheduled while we were firing.
                continue;
            }
            match next {
                NextRun::At(run_at, target) => {
                    if let Some(entry) = state.entries.get_mut(&d.id) {
                        entry.run_at = run_at;
                        entry.target = target;
                    }
                    state.queue.push(run_at, (d.id, d.generation));
                }
                NextRun::Retire => {
                    state.entries.remove(&d.id);
                    debug!(job = %d.name, id = %d.id, "job retired");
                }
                NextRun::Panicked(message) => {
                    state.entries.remove(&d.id);
                    error!(job = %d.name, id = %d.id, "next-run callback panicked, job retired: {message}");
                }
            }
        }
        due.len()
    }

    /// Main loop. Runs until `shutdown` carries `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler loop already running");
            return;
        }
        info!(jobs = self.len(), "scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let fired = self.tick();
            if fired > 0 {
                debug!(fired, "scheduler tick");
            }
            let wait = self.next_wait();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shared.wake.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shared.running.store(false, Ordering::SeqCst);
        info!(in_flight = self.in_flight(), "scheduler stopped");
    }

    /// Run the loop on the current runtime.
    pub fn spawn(&self) -> SchedulerTask {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(self.clone().run(rx));
        SchedulerTask { shutdown, handle }
    }

    /// Wait up to `timeout` for fired jobs to finish. Returns whether they all did.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pop_due(&self, now: Instant) -> Vec<Due> {
        let mut state = self.state();
        let state = &mut *state;
        let mut due = Vec::new();
        while let Some((run_at, (id, generation))) = state.queue.pop_due(now) {
            let Some(entry) = state.entries.get_mut(&id) else {
                continue;
            };
            if entry.generation != generation {
                continue;
            }
            entry.run_count += 1;
            entry.last_run = Some(Utc::now());
            due.push(Due {
                id,
                generation,
                run_at,
                target: entry.target,
                name: entry.name.clone(),
                trigger: entry.trigger.clone(),
                job: Arc::clone(&entry.job),
            });
        }
        due
    }

    fn next_wait(&self) -> Duration {
        let ceiling = self.shared.idle_ceiling;
        match self.state().queue.peek_time() {
            Some(at) => at.saturating_duration_since(Instant::now()).min(ceiling),
            None => ceiling,
        }
    }

    fn fire(&self, id: ScheduledJobId, name: String, job: JobFn) {
        let shared = Arc::clone(&self.shared);
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let args = JobArgs::default().with_job_id(id.to_string());

        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(async move { job(args).await })
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(_)) => None,
                Ok(Err(e)) => Some(e.message),
                Err(panic) => Some(format!("job panicked: {}", panic_message(panic.as_ref()))),
            };
            match failure {
                None => debug!(job = %name, %id, "job finished"),
                Some(message) => {
                    error!(job = %name, %id, "job failed: {message}");
                    let mut state = shared
                        .state
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    if let Some(entry) = state.entries.get_mut(&id) {
                        entry.error_count += 1;
                        entry.last_error = Some(message);
                    }
                }
            }
            shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

/// Handle to a loop started with [`Scheduler::spawn`].
pub struct SchedulerTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SchedulerTask {
    /// Ask the loop to exit without waiting.
    pub fn signal(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Signal and wait for the loop to exit. Fired jobs keep running.
    pub async fn stop(self) {
        self.signal();
        if let Err(e) = self.handle.await {
            error!("scheduler task ended abnormally: {e}");
        }
    }
}

fn first_run_at(trigger: &Trigger, now: Instant) -> Result<(Instant, Option<DateTime<Utc>>)> {
    match trigger {
        Trigger::Interval { delay, .. } => Ok((now + *delay, None)),
        Trigger::Weekly {
            day_of_week,
            hour,
            minute,
            offset,
        } => recurrence::next_weekly(Utc::now(), *day_of_week, *hour, *minute, *offset)
            .map(|wall| (instant_for(wall, now), None))
            .ok_or_else(|| SchedulerError::InvalidSchedule("weekly trigger has no next run".into())),
        Trigger::Custom { next_run, .. } => {
            match catch_unwind(AssertUnwindSafe(|| next_run(Utc::now()))) {
                Ok(Some(wall)) => Ok((instant_for(wall, now), Some(wall))),
                Ok(None) => Err(SchedulerError::InvalidSchedule(
                    "custom trigger returned no run time".into(),
                )),
                Err(panic) => Err(SchedulerError::InvalidSchedule(format!(
                    "custom trigger panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            }
        }
    }
}

fn next_run_at(
    trigger: &Trigger,
    fired_at: Instant,
    target: Option<DateTime<Utc>>,
    now: Instant,
) -> NextRun {
    match trigger {
        Trigger::Interval { repeat: None, .. } => NextRun::Retire,
        Trigger::Interval {
            repeat: Some(period),
            ..
        } => NextRun::At(advance(fired_at, *period, now), None),
        Trigger::Weekly { .. } => NextRun::At(advance(fired_at, WEEK, now), None),
        Trigger::Custom { next_run, .. } => {
            // A wall clock stepped back must not hand out the slot that just fired.
            let after = target.map_or_else(Utc::now, |t| t.max(Utc::now()));
            match catch_unwind(AssertUnwindSafe(|| next_run(after))) {
                Ok(Some(wall)) => NextRun::At(instant_for(wall, now), Some(wall)),
                Ok(None) => NextRun::Retire,
                Err(panic) => NextRun::Panicked(panic_message(panic.as_ref())),
            }
        }
    }
}

/// `prev + period`, or `now + period` when that slot has already passed
/// (missed fires are coalesced, never replayed).
fn advance(prev: Instant, period: Duration, now: Instant) -> Instant {
    let next = prev + period;
    if next <= now {
        now + period
    } else {
        next
    }
}

/// Map a wall-clock time onto the monotonic clock. Past times map to `now`.
fn instant_for(wall: DateTime<Utc>, now: Instant) -> Instant {
    now + (wall - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

fn snapshot(
    id: ScheduledJobId,
    entry: &Entry,
    now: Instant,
    wall: DateTime<Utc>,
) -> ScheduledJobStatus {
    let until = chrono::Duration::from_std(entry.run_at.saturating_duration_since(now))
        .unwrap_or_else(|_| chrono::Duration::zero());
    ScheduledJobStatus {
        id,
        name: entry.name.clone(),
        kind: entry.trigger.kind().to_string(),
        next_run: Some(wall + until),
        run_count: entry.run_count,
        error_count: entry.error_count,
        last_error: entry.last_error.clone(),
        last_run: entry.last_run,
        created_at: entry.created_at,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use cadence_core::{job_fn, JobError};
    use serde_json::json;

    fn scheduler() -> Scheduler {
        Scheduler::new(&SchedulerConfig::default()).expect("scheduler")
    }

    fn explode() -> cadence_core::JobResult {
        panic!("boom")
    }

    fn counting_job(counter: &Arc<AtomicUsize>) -> JobFn {
        let counter = Arc::clone(counter);
        job_fn(move |_args| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, JobError>(json!(null)) }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn interval_fires_once_per_period() {
        let sched = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let id = sched
            .schedule("tick", Trigger::every(Duration::from_secs(10)), counting_job(&count))
            .expect("schedule");
        let task = sched.spawn();

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(sched.job_status(id).expect("status").run_count, 3);

        task.stop().await;
        assert!(!sched.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_interval_fires_once_per_period_advance() {
        let sched = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let trigger = Trigger::Interval {
            delay: Duration::ZERO,
            repeat: Some(Duration::from_secs(60)),
        };
        let id = sched
            .schedule("minutely", trigger, counting_job(&count))
            .expect("schedule");

        assert_eq!(sched.tick(), 1);
        assert_eq!(sched.tick(), 0);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(sched.tick(), 1);
        assert_eq!(sched.tick(), 0);
        assert_eq!(sched.job_status(id).expect("status").run_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once_and_retires() {
        let sched = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        sched
            .schedule("once", Trigger::once_after(Duration::from_secs(5)), counting_job(&count))
            .expect("schedule");
        let task = sched.spawn();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(sched.is_empty());
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_job_never_fires() {
        let sched = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let id = sched
            .schedule("never", Trigger::once_after(Duration::from_secs(5)), counting_job(&count))
            .expect("schedule");
        let task = sched.spawn();
        sched.cancel(id).expect("cancel");
        assert!(matches!(sched.cancel(id), Err(SchedulerError::JobNotFound { .. })));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_moves_the_next_fire() {
        let sched = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let id = sched
            .schedule("later", Trigger::once_after(Duration::from_secs(600)), counting_job(&count))
            .expect("schedule");
        let task = sched.spawn();
        sched.reschedule(id, Duration::from_secs(2)).expect("reschedule");

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_and_panicking_jobs_do_not_stop_the_loop() {
        let sched = scheduler();
        let healthy = Arc::new(AtomicUsize::new(0));
        let panicky = sched
            .schedule(
                "panicky",
                Trigger::every(Duration::from_secs(1)),
                job_fn(|_args| async { explode() }),
            )
            .expect("schedule");
        let failing = sched
            .schedule(
                "failing",
                Trigger::every(Duration::from_secs(1)),
                job_fn(|_args| async { Err::<serde_json::Value, _>(JobError::new("nope")) }),
            )
            .expect("schedule");
        sched
            .schedule("healthy", Trigger::every(Duration::from_secs(1)), counting_job(&healthy))
            .expect("schedule");
        let task = sched.spawn();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(healthy.load(Ordering::SeqCst), 3);

        let panicky = sched.job_status(panicky).expect("status");
        assert_eq!(panicky.error_count, 3);
        assert!(panicky.last_error.expect("error").contains("boom"));
        let failing = sched.job_status(failing).expect("status");
        assert_eq!(failing.error_count, 3);
        assert_eq!(failing.last_error.as_deref(), Some("nope"));

        assert!(sched.is_running());
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn custom_trigger_retires_on_none() {
        let sched = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let trigger = Trigger::custom(move || {
            // Two runs, then done.
            if calls_in.fetch_add(1, Ordering::SeqCst) < 2 {
                Some(Utc::now() + chrono::Duration::seconds(2))
            } else {
                None
            }
        });
        sched
            .schedule("custom", trigger, counting_job(&count))
            .expect("schedule");
        let task = sched.spawn();

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(sched.is_empty());
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn custom_time_in_the_past_fires_on_next_tick() {
        let sched = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let trigger = Trigger::custom(move || {
            (calls_in.fetch_add(1, Ordering::SeqCst) == 0)
                .then(|| Utc::now() - chrono::Duration::hours(1))
        });
        sched
            .schedule("overdue", trigger, counting_job(&count))
            .expect("schedule");
        let task = sched.spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn calendar_slot_is_not_handed_out_twice_when_wall_clock_lags() {
        // Paused Tokio time moves while the wall clock stands still, which is
        // what the loop sees after the wall clock is stepped back.
        let sched = scheduler();
        let base = Utc::now();
        let slots: Vec<_> = (1..=10)
            .map(|i| base + chrono::Duration::seconds(10 * i))
            .collect();
        let produced = Arc::new(Mutex::new(Vec::new()));
        let produced_in = Arc::clone(&produced);
        let trigger = Trigger::custom_after(move |after| {
            let next = slots.iter().copied().find(|slot| *slot > after);
            if let Some(slot) = next {
                produced_in.lock().expect("lock").push(slot);
            }
            next
        });
        let count = Arc::new(AtomicUsize::new(0));
        sched
            .schedule("month-end", trigger, counting_job(&count))
            .expect("schedule");
        let task = sched.spawn();

        // First slot fires at ~10 s; the second is 20 s further on.
        tokio::time::sleep(Duration::from_secs(35)).await;
        task.stop().await;

        let produced = produced.lock().expect("lock").clone();
        assert_eq!(produced.len(), 3, "{produced:?}");
        assert!(produced.windows(2).all(|w| w[0] < w[1]), "{produced:?}");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_retires_only_its_entry() {
        let sched = scheduler();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let trigger = Trigger::custom(move || {
            if calls_in.fetch_add(1, Ordering::SeqCst) == 0 {
                Some(Utc::now())
            } else {
                panic!("calendar service down")
            }
        });
        let count = Arc::new(AtomicUsize::new(0));
        sched
            .schedule("fragile", trigger, counting_job(&count))
            .expect("schedule");
        let steady = sched
            .schedule("steady", Trigger::every(Duration::from_secs(60)), counting_job(&count))
            .expect("schedule");

        assert_eq!(sched.tick(), 1);
        assert_eq!(sched.len(), 1);
        assert!(sched.job_status(steady).is_ok());
    }

    #[tokio::test]
    async fn custom_returning_none_at_schedule_time_is_rejected() {
        let sched = scheduler();
        let err = sched
            .schedule(
                "empty",
                Trigger::custom(|| None),
                job_fn(|_| async { Ok::<_, JobError>(json!(null)) }),
            )
            .expect_err("no first run");
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn weekly_entry_repeats_every_seven_days() {
        let sched = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let offset = FixedOffset::east_opt(0).expect("offset");
        let id = sched
            .schedule("weekly", Trigger::weekly(3, 21, 50, offset).expect("trigger"), counting_job(&count))
            .expect("schedule");

        let first = sched.job_status(id).expect("status").next_run.expect("next");
        assert!(first > Utc::now());
        assert!(first - Utc::now() <= chrono::Duration::days(7));

        // Jump past the first fire, then one week on.
        let margin = Duration::from_secs(1);
        let until_first = (first - Utc::now()).to_std().expect("positive");
        tokio::time::advance(until_first + margin).await;
        assert_eq!(sched.tick(), 1);
        tokio::time::advance(WEEK - 2 * margin).await;
        assert_eq!(sched.tick(), 0);
        tokio::time::advance(2 * margin).await;
        assert_eq!(sched.tick(), 1);
        assert_eq!(sched.job_status(id).expect("status").run_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn list_reports_kind_and_counters() {
        let sched = scheduler();
        let noop = job_fn(|_| async { Ok::<_, JobError>(json!(null)) });
        sched
            .schedule("later", Trigger::once_after(Duration::from_secs(60)), Arc::clone(&noop))
            .expect("schedule");
        sched
            .schedule("soon", Trigger::every(Duration::from_secs(5)), noop)
            .expect("schedule");

        let jobs = sched.list();
        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["soon", "later"]);
        assert_eq!(jobs[0].kind, "interval");
        assert_eq!(jobs[1].kind, "once");
        assert_eq!(jobs[0].run_count, 0);

        sched.clear();
        assert!(sched.is_empty());
        assert!(sched.list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_in_flight_jobs() {
        let sched = scheduler();
        sched
            .schedule(
                "slow",
                Trigger::once_after(Duration::ZERO),
                job_fn(|_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, JobError>(json!(null))
                }),
            )
            .expect("schedule");
        assert_eq!(sched.tick(), 1);
        tokio::task::yield_now().await;
        assert_eq!(sched.in_flight(), 1);
        assert!(!sched.drain(Duration::from_secs(1)).await);
        assert!(sched.drain(Duration::from_secs(10)).await);
    }
}
