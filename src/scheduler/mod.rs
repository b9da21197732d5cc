//! Recurring job scheduler.
//!
//! Every job gets its own timer task. A firing spawns the callback on its own
//! task so a slow job never delays anyone else's timer. A per-job `running`
//! flag makes sure a job never overlaps itself: a firing that finds the
//! previous run still going is skipped, not queued. The flag outlives
//! `remove_task`, so an id re-registered while its last run is still going
//! waits for that run too.

pub mod trigger;

pub use trigger::Trigger;

use chrono::{NaiveTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Shortest interval a job may be registered with.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("job id already registered: {0}")]
    DuplicateJobId(String),

    #[error("interval {interval:?} for job {job_id} is below the {min:?} minimum")]
    IntervalTooShort {
        job_id: String,
        interval: Duration,
        min: Duration,
    },

    #[error("job {job_id} failed: {reason}")]
    CallbackFailure { job_id: String, reason: String },

    #[error("{failed} in-flight job(s) did not finish cleanly during shutdown")]
    Drain { failed: usize },
}

/// Snapshot of one registered job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub job_id: String,
    pub trigger: Trigger,
    pub running: bool,
    pub enabled: bool,
}

struct ScheduledJob {
    trigger: Trigger,
    callback: JobFn,
    running: Arc<AtomicBool>,
    enabled: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SchedulerState {
    running: bool,
    jobs: HashMap<String, ScheduledJob>,
    /// `running` flags of removed jobs whose last run has not finished
    retired: HashMap<String, Arc<AtomicBool>>,
    in_flight: JoinSet<()>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<SchedulerState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears a job's `running` flag when the invocation ends, however it ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to the scheduler. Cheap to clone; all clones share one job table.
///
/// Registration and `start` spawn Tokio tasks, so they must be called from
/// inside a Tokio runtime.
#[derive(Clone, Default)]
pub struct TaskScheduler {
    shared: Arc<Shared>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timers of every registered job. Calling it again is a no-op.
    pub fn start(&self) {
        let mut state = self.shared.lock();
        if state.running {
            tracing::debug!("Scheduler already running");
            return;
        }
        state.running = true;

        for (job_id, job) in state.jobs.iter_mut() {
            job.timer = Some(spawn_timer(
                Arc::downgrade(&self.shared),
                job_id.clone(),
                job.trigger,
            ));
        }

        tracing::info!("Scheduler started ({} jobs)", state.jobs.len());
    }

    /// Stop the scheduler.
    ///
    /// Waits for every in-flight invocation to return, then cancels all
    /// timers and forgets every job. Nothing fires after this returns.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let (jobs, mut in_flight) = {
            let mut state = self.shared.lock();
            if !state.running {
                tracing::debug!("Scheduler not running");
                return Ok(());
            }
            state.running = false;
            let jobs: Vec<(String, ScheduledJob)> = state.jobs.drain().collect();
            state.retired.clear();
            (jobs, std::mem::take(&mut state.in_flight))
        };

        if !in_flight.is_empty() {
            tracing::info!("Waiting for {} in-flight job(s) to finish", in_flight.len());
        }

        let mut failed = 0;
        while let Some(result) = in_flight.join_next().await {
            if let Err(e) = result {
                tracing::error!("In-flight job did not finish cleanly: {}", e);
                failed += 1;
            }
        }

        for (job_id, job) in jobs {
            if let Some(timer) = job.timer {
                timer.abort();
            }
            tracing::debug!(job_id = %job_id, "Cancelled job");
        }

        tracing::info!("Scheduler stopped");

        if failed > 0 {
            return Err(SchedulerError::Drain { failed });
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Register a job that fires every `interval`.
    ///
    /// The first run happens one full `interval` after the timer is armed
    /// (now if the scheduler is running, otherwise at `start`). Parameters the
    /// job needs are captured by the closure.
    pub fn add_interval_task<F, Fut>(
        &self,
        job_id: impl Into<String>,
        interval: Duration,
        task_fn: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job_id = job_id.into();
        if interval < MIN_INTERVAL {
            return Err(SchedulerError::IntervalTooShort {
                job_id,
                interval,
                min: MIN_INTERVAL,
            });
        }

        self.register(job_id, Trigger::Interval(interval), task_fn)
    }

    /// Register a job that fires once a day at `at` (UTC).
    pub fn add_daily_task<F, Fut>(
        &self,
        job_id: impl Into<String>,
        at: NaiveTime,
        weekdays_only: bool,
        task_fn: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(job_id.into(), Trigger::Daily { at, weekdays_only }, task_fn)
    }

    fn register<F, Fut>(
        &self,
        job_id: String,
        trigger: Trigger,
        task_fn: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: JobFn = Arc::new(move || Box::pin(task_fn()) as JobFuture);

        let mut state = self.shared.lock();
        if state.jobs.contains_key(&job_id) {
            return Err(SchedulerError::DuplicateJobId(job_id));
        }

        let running = match state.retired.remove(&job_id) {
            Some(flag) if flag.load(Ordering::Acquire) => {
                tracing::debug!(job_id = %job_id, "Previous run of this id still in progress");
                flag
            }
            _ => Arc::new(AtomicBool::new(false)),
        };

        let timer = state
            .running
            .then(|| spawn_timer(Arc::downgrade(&self.shared), job_id.clone(), trigger));

        state.jobs.insert(
            job_id.clone(),
            ScheduledJob {
                trigger,
                callback,
                running,
                enabled: Arc::new(AtomicBool::new(true)),
                timer,
            },
        );

        tracing::info!(job_id = %job_id, "Added task: {}", trigger);
        Ok(())
    }

    /// Cancel future firings of a job. A run already in progress finishes,
    /// and a job registered under the same id does not start until it has.
    ///
    /// Returns `false` if no such job was registered.
    pub fn remove_task(&self, job_id: &str) -> bool {
        let mut state = self.shared.lock();
        state.retired.retain(|_, flag| flag.load(Ordering::Acquire));

        match state.jobs.remove(job_id) {
            Some(job) => {
                if let Some(timer) = job.timer {
                    timer.abort();
                }
                if job.running.load(Ordering::Acquire) {
                    state.retired.insert(job_id.to_string(), job.running);
                }
                tracing::info!(job_id = %job_id, "Removed task");
                true
            }
            None => {
                tracing::debug!(job_id = %job_id, "No task to remove");
                false
            }
        }
    }

    /// Pause or resume a job without dropping its registration.
    ///
    /// Firings of a disabled job are ignored. Returns `false` if the job is
    /// unknown.
    pub fn set_enabled(&self, job_id: &str, enabled: bool) -> bool {
        let state = self.shared.lock();
        match state.jobs.get(job_id) {
            Some(job) => {
                job.enabled.store(enabled, Ordering::Release);
                tracing::info!(job_id = %job_id, enabled, "Task toggled");
                true
            }
            None => false,
        }
    }

    /// Fire a registered job once, outside its timer.
    ///
    /// The run goes through the same overlap guard as a timer firing and is
    /// drained by `stop`. Does not wait for the run: the returned receiver
    /// resolves when it ends. `None` means nothing was started because the
    /// job is unknown, disabled or busy, or the scheduler is stopped.
    pub fn run_now(&self, job_id: &str) -> Option<oneshot::Receiver<()>> {
        let done = dispatch(&self.shared, job_id);
        if done.is_none() {
            tracing::debug!(job_id = %job_id, "Immediate run not started");
        }
        done
    }

    pub fn has_task(&self, job_id: &str) -> bool {
        self.shared.lock().jobs.contains_key(job_id)
    }

    /// Registered jobs, sorted by id
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let state = self.shared.lock();
        let mut jobs: Vec<JobInfo> = state
            .jobs
            .iter()
            .map(|(job_id, job)| JobInfo {
                job_id: job_id.clone(),
                trigger: job.trigger,
                running: job.running.load(Ordering::Acquire),
                enabled: job.enabled.load(Ordering::Acquire),
            })
            .collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        jobs
    }
}

/// Timer loop for one job. Holds only a weak handle so a dropped scheduler
/// lets its timers wind down.
fn spawn_timer(shared: Weak<Shared>, job_id: String, trigger: Trigger) -> JoinHandle<()> {
    tokio::spawn(async move {
        match trigger {
            Trigger::Interval(period) => {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    ticker.tick().await;
                    let Some(shared) = shared.upgrade() else {
                        break;
                    };
                    let _ = dispatch(&shared, &job_id);
                }
            }
            Trigger::Daily { at, weekdays_only } => loop {
                let now = Utc::now();
                let next = trigger::next_daily_fire(at, weekdays_only, now);
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                tracing::debug!(job_id = %job_id, "Next run at {}", next.format("%Y-%m-%d %H:%M:%S"));

                tokio::time::sleep(wait).await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                let _ = dispatch(&shared, &job_id);
            },
        }
    })
}

/// One firing: apply the overlap guard and hand the callback to its own task.
///
/// Returns a receiver completed when the run ends, or `None` if it was skipped.
fn dispatch(shared: &Shared, job_id: &str) -> Option<oneshot::Receiver<()>> {
    let mut state = shared.lock();
    if !state.running {
        return None;
    }

    let job = state.jobs.get(job_id)?;

    if !job.enabled.load(Ordering::Acquire) {
        tracing::debug!(job_id = %job_id, "Task disabled, ignoring firing");
        return None;
    }

    if job.running.swap(true, Ordering::AcqRel) {
        tracing::warn!(
            job_id = %job_id,
            "Previous run still in progress, skipping this firing"
        );
        return None;
    }

    let guard = RunningGuard(job.running.clone());
    let callback = job.callback.clone();
    let job_id = job_id.to_string();

    // Reap finished invocations so the set does not grow unbounded
    while state.in_flight.try_join_next().is_some() {}

    let (done_tx, done_rx) = oneshot::channel();
    state.in_flight.spawn(async move {
        run_job(job_id, callback, guard).await;
        let _ = done_tx.send(());
    });

    Some(done_rx)
}

async fn run_job(job_id: String, callback: JobFn, _guard: RunningGuard) {
    let started = Instant::now();
    tracing::debug!(job_id = %job_id, "Running task");

    // The callback runs on its own task so a panic is contained there
    let outcome = tokio::spawn(async move { callback().await }).await;

    let failure = match outcome {
        Ok(Ok(())) => {
            tracing::debug!(job_id = %job_id, "Task finished in {:?}", started.elapsed());
            return;
        }
        Ok(Err(e)) => format!("{:#}", e),
        Err(e) if e.is_panic() => "callback panicked".to_string(),
        Err(e) => e.to_string(),
    };

    let error = SchedulerError::CallbackFailure {
        job_id: job_id.clone(),
        reason: failure,
    };
    tracing::error!(job_id = %job_id, "{}", error);
}
