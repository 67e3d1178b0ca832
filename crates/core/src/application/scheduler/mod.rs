// Task Scheduler - named periodic jobs with isolated execution
//
// The loop only decides *what* is due; every firing runs in its own spawned
// tokio task so a slow, failing or panicking job never delays the loop or
// other jobs.

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{stop_channel, StopSender, StopToken};

use crate::application::panic_guard::panic_message;
use crate::domain::{SchedulerStatus, TaskRecord, TaskSnapshot, TaskStatus};
use crate::error::{AppError, Result};
use crate::port::{Clock, Job, JobError, TaskRunRecorder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct TaskEntry {
    record: TaskRecord,
    job: Arc<dyn Job>,
    /// Distinguishes re-registrations of the same name
    generation: u64,
}

/// Everything a firing needs once the table lock is released
struct Dispatch {
    name: String,
    job: Arc<dyn Job>,
    generation: u64,
    snapshot: TaskSnapshot,
}

impl Dispatch {
    fn from_entry(entry: &TaskEntry) -> Self {
        Self {
            name: entry.record.name.clone(),
            job: Arc::clone(&entry.job),
            generation: entry.generation,
            snapshot: entry.record.snapshot(),
        }
    }
}

struct SchedulerCore {
    tasks: Mutex<HashMap<String, TaskEntry>>,
    clock: Arc<dyn Clock>,
    recorder: Option<Arc<dyn TaskRunRecorder>>,
    poll_interval: Duration,
    in_flight: AtomicUsize,
    generations: AtomicU64,
}

struct LoopHandle {
    stop: StopSender,
    handle: JoinHandle<()>,
}

/// Builder for [`TaskScheduler`]
pub struct TaskSchedulerBuilder {
    clock: Arc<dyn Clock>,
    recorder: Option<Arc<dyn TaskRunRecorder>>,
    poll_interval: Duration,
}

impl TaskSchedulerBuilder {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn TaskRunRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn build(self) -> TaskScheduler {
        TaskScheduler {
            core: Arc::new(SchedulerCore {
                tasks: Mutex::new(HashMap::new()),
                clock: self.clock,
                recorder: self.recorder,
                poll_interval: self.poll_interval,
                in_flight: AtomicUsize::new(0),
                generations: AtomicU64::new(0),
            }),
            running: AtomicBool::new(false),
            loop_handle: tokio::sync::Mutex::new(None),
        }
    }
}

/// Periodic task scheduler
pub struct TaskScheduler {
    core: Arc<SchedulerCore>,
    running: AtomicBool,
    /// Async mutex so start/stop serialize and two loops never coexist
    loop_handle: tokio::sync::Mutex<Option<LoopHandle>>,
}

impl TaskScheduler {
    pub fn builder(clock: Arc<dyn Clock>) -> TaskSchedulerBuilder {
        TaskSchedulerBuilder {
            clock,
            recorder: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Register (or replace) a task and compute its first `next_run`
    ///
    /// # Arguments
    /// * `name` - Unique task name; an existing task with this name is replaced
    /// * `job` - Work to run on each firing
    /// * `schedule` - `daily@H`, `weekly@D@H`, `interval@M` or `hourly`
    ///   (anything else falls back to a 30 minute interval)
    pub async fn add_task(
        &self,
        name: impl Into<String>,
        job: Arc<dyn Job>,
        schedule: &str,
    ) -> TaskSnapshot {
        self.add_task_with_state(name, job, schedule, true).await
    }

    /// Register (or replace) a task, optionally disabled
    ///
    /// A disabled task keeps its computed `next_run` but is never due until
    /// [`TaskScheduler::enable_task`] reschedules it from the current time.
    pub async fn add_task_with_state(
        &self,
        name: impl Into<String>,
        job: Arc<dyn Job>,
        schedule: &str,
        enabled: bool,
    ) -> TaskSnapshot {
        let name = name.into();
        let mut record = TaskRecord::new(name.clone(), schedule, self.core.clock.now());
        if !enabled {
            record.disable();
        }
        let snapshot = record.snapshot();
        let generation = self.core.generations.fetch_add(1, Ordering::SeqCst);

        let replaced = self
            .core
            .tasks
            .lock()
            .insert(
                name.clone(),
                TaskEntry {
                    record,
                    job,
                    generation,
                },
            )
            .is_some();

        info!(
            task = %name,
            schedule = %snapshot.schedule,
            next_run = ?snapshot.next_run,
            enabled,
            replaced,
            "Task registered"
        );
        self.core.record(&snapshot).await;
        snapshot
    }

    /// Cancel a task and drop it from the table
    ///
    /// An execution already in flight finishes, but its outcome is discarded.
    pub async fn remove_task(&self, name: &str) -> Result<TaskSnapshot> {
        let snapshot = {
            let mut tasks = self.core.tasks.lock();
            let mut entry = tasks
                .remove(name)
                .ok_or_else(|| AppError::NotFound(format!("task '{name}'")))?;
            entry.record.cancel();
            entry.record.snapshot()
        };
        info!(task = %name, "Task removed");
        self.core.record(&snapshot).await;
        Ok(snapshot)
    }

    /// Enable a task and recompute its next fire time from now
    pub fn enable_task(&self, name: &str) -> Result<()> {
        let now = self.core.clock.now();
        self.with_task(name, |record| record.enable(now))?;
        info!(task = %name, "Task enabled");
        Ok(())
    }

    pub fn disable_task(&self, name: &str) -> Result<()> {
        self.with_task(name, TaskRecord::disable)?;
        info!(task = %name, "Task disabled");
        Ok(())
    }

    pub fn get_task(&self, name: &str) -> Option<TaskSnapshot> {
        self.core
            .tasks
            .lock()
            .get(name)
            .map(|entry| entry.record.snapshot())
    }

    /// All tasks ordered by name
    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        let mut tasks: Vec<TaskSnapshot> = self
            .core
            .tasks
            .lock()
            .values()
            .map(|entry| entry.record.snapshot())
            .collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        tasks
    }

    pub fn status(&self) -> SchedulerStatus {
        let tasks = self.list_tasks();
        SchedulerStatus {
            running: self.is_running(),
            total_tasks: tasks.len(),
            enabled_tasks: tasks.iter().filter(|t| t.enabled).count(),
            tasks,
            timestamp: self.core.clock.now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Executions currently in flight
    pub fn in_flight(&self) -> usize {
        self.core.in_flight.load(Ordering::SeqCst)
    }

    /// Fire a task immediately, outside its schedule
    ///
    /// Returns `Ok(false)` if the task is already running. `next_run` is left
    /// untouched until the run completes and re-arms it.
    pub fn run_task_now(&self, name: &str) -> Result<bool> {
        let now = self.core.clock.now();
        let dispatch = {
            let mut tasks = self.core.tasks.lock();
            let entry = tasks
                .get_mut(name)
                .ok_or_else(|| AppError::NotFound(format!("task '{name}'")))?;
            if entry.record.status == TaskStatus::Running {
                info!(task = %name, "Task already running, manual run skipped");
                return Ok(false);
            }
            entry.record.begin(now)?;
            Dispatch::from_entry(entry)
        };
        info!(task = %name, "Manual run requested");
        Arc::clone(&self.core).spawn_firing(dispatch);
        Ok(true)
    }

    /// Start the scheduling loop (no-op if already running)
    pub async fn start(&self) {
        let mut guard = self.loop_handle.lock().await;
        if guard.is_some() {
            warn!("Scheduler already running");
            return;
        }
        let (stop, token) = stop_channel();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.core), token));
        *guard = Some(LoopHandle { stop, handle });
        self.running.store(true, Ordering::SeqCst);
        info!(tasks = self.core.tasks.lock().len(), "Scheduler started");
    }

    /// Stop the loop; in-flight executions are left to finish on their own
    ///
    /// Waits up to [`STOP_JOIN_TIMEOUT`] for the loop, then aborts it.
    pub async fn stop(&self) {
        let mut guard = self.loop_handle.lock().await;
        let Some(LoopHandle { stop, mut handle }) = guard.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        stop.stop();

        match tokio::time::timeout(STOP_JOIN_TIMEOUT, &mut handle).await {
            Ok(_) => info!("Scheduler stopped"),
            Err(_) => {
                warn!(
                    timeout_secs = STOP_JOIN_TIMEOUT.as_secs(),
                    "Scheduler loop did not exit in time, aborting"
                );
                handle.abort();
                let _ = handle.await;
            }
        }
    }

    /// Wait until no execution is in flight, up to `timeout`
    ///
    /// Returns `false` if executions were still running when the bound expired.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                warn!(in_flight = self.in_flight(), "Executions still running after drain timeout");
                return false;
            }
            sleep(DRAIN_POLL_INTERVAL).await;
        }
        true
    }

    fn with_task(&self, name: &str, f: impl FnOnce(&mut TaskRecord)) -> Result<()> {
        let mut tasks = self.core.tasks.lock();
        let entry = tasks
            .get_mut(name)
            .ok_or_else(|| AppError::NotFound(format!("task '{name}'")))?;
        f(&mut entry.record);
        Ok(())
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if let Some(LoopHandle { stop, handle }) = self.loop_handle.get_mut().take() {
            stop.stop();
            handle.abort();
        }
    }
}

async fn run_loop(core: Arc<SchedulerCore>, mut stop: StopToken) {
    info!(
        poll_interval_ms = core.poll_interval.as_millis() as u64,
        "Scheduler loop started"
    );
    loop {
        if stop.is_stopped() {
            break;
        }

        let fired = core.dispatch_due();
        if fired > 0 {
            debug!(fired, "Dispatched due tasks");
        }

        tokio::select! {
            _ = sleep(core.poll_interval) => {},
            _ = stop.wait() => break,
        }
    }
    info!("Scheduler loop stopped");
}

impl SchedulerCore {
    /// Mark every due task running under the lock, then spawn their firings
    fn dispatch_due(self: &Arc<Self>) -> usize {
        let now = self.clock.now();
        let due: Vec<Dispatch> = {
            let mut tasks = self.tasks.lock();
            tasks
                .values_mut()
                .filter(|entry| entry.record.is_due(now))
                .filter_map(|entry| match entry.record.begin(now) {
                    Ok(()) => Some(Dispatch::from_entry(entry)),
                    Err(e) => {
                        warn!(task = %entry.record.name, error = %e, "Skipping due task");
                        None
                    }
                })
                .collect()
        };

        let fired = due.len();
        for dispatch in due {
            Arc::clone(self).spawn_firing(dispatch);
        }
        fired
    }

    fn spawn_firing(self: Arc<Self>, dispatch: Dispatch) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            self.fire(dispatch).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    async fn fire(&self, dispatch: Dispatch) {
        let Dispatch {
            name,
            job,
            generation,
            snapshot,
        } = dispatch;
        let firing_id = Uuid::new_v4();
        info!(task = %name, firing_id = %firing_id, "Task started");
        self.record(&snapshot).await;

        let started = Instant::now();
        // Nested spawn: a panic inside the job surfaces as a JoinError here
        let outcome = match tokio::spawn(async move { job.run().await }).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.to_string()),
            Err(join_err) if join_err.is_panic() => {
                Err(JobError::Panicked(panic_message(&*join_err.into_panic())).to_string())
            }
            Err(join_err) => Err(format!("Task cancelled: {join_err}")),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(result) => info!(
                task = %name,
                firing_id = %firing_id,
                duration_ms,
                result = %result,
                "Task completed"
            ),
            Err(e) => error!(
                task = %name,
                firing_id = %firing_id,
                duration_ms,
                error = %e,
                "Task failed"
            ),
        }

        let finished_at = self.clock.now();
        let finished = {
            let mut tasks = self.tasks.lock();
            match tasks.get_mut(&name) {
                Some(entry) if entry.generation == generation => {
                    entry.record.finish(outcome, finished_at);
                    Some(entry.record.snapshot())
                }
                _ => None,
            }
        };

        match finished {
            Some(snapshot) => {
                debug!(task = %name, next_run = ?snapshot.next_run, "Task re-armed");
                self.record(&snapshot).await;
            }
            None => warn!(task = %name, "Task removed or replaced while running, outcome discarded"),
        }
    }

    async fn record(&self, snapshot: &TaskSnapshot) {
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record(snapshot).await {
                warn!(task = %snapshot.name, error = %e, "Failed to record task state");
            }
        }
    }
}
