//! Task container: scheduler thread, manual triggers, status surface.
//!
//! RULE: every execution opens its own store session and drops it on
//! completion. The container never hands a live connection across
//! threads.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};

use crate::config::ContainerConfig;
use crate::error::{TaskError, TaskResult};
use crate::job;
use crate::scheduler::{Schedule, WorkerPool};
use crate::status::{ExecutionStatus, ExecutionTracker};
use crate::store::{TaskConfig, TaskStore};
use crate::types::{ExecutionId, TaskId};

const POLL_INTERVAL: StdDuration = StdDuration::from_secs(1);

/// One scheduler entry: a task id plus when it fires next.
#[derive(Debug, Clone)]
struct ScheduledTask {
    task_id: TaskId,
    task_name: String,
    schedule: Schedule,
    next_fire: DateTime<Utc>,
}

/// Owns the scheduler thread and the shared status table. Scheduled
/// executions run on the bounded worker pool; manual triggers run on
/// detached threads so a busy pool cannot delay them.
pub struct TaskContainer {
    config: Arc<ContainerConfig>,
    tracker: ExecutionTracker,
    entries: Arc<Mutex<Vec<ScheduledTask>>>,
    running: Arc<AtomicBool>,
    scheduler: Option<JoinHandle<()>>,
}

impl TaskContainer {
    /// Opens the store once to apply migrations, then releases it.
    pub fn new(config: ContainerConfig) -> TaskResult<Self> {
        let store = TaskStore::open(&config.db_path)?;
        store.migrate()?;
        drop(store);
        Ok(Self {
            config: Arc::new(config),
            tracker: ExecutionTracker::new(),
            entries: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            scheduler: None,
        })
    }

    /// Start the scheduler thread. The worker pool is created here so
    /// a failure surfaces to the caller, then moves into the thread.
    pub fn start(&mut self) -> TaskResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!("task scheduler is already running");
            return Ok(());
        }
        let pool = WorkerPool::new(self.config.worker_concurrency)?;
        let config = Arc::clone(&self.config);
        let tracker = self.tracker.clone();
        let entries = Arc::clone(&self.entries);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("task-scheduler".to_string())
            .spawn(move || scheduler_loop(config, tracker, entries, running, pool))?;
        self.scheduler = Some(handle);
        log::info!("task scheduler started");
        Ok(())
    }

    /// Stop the scheduler and wait for it (and its pool) to drain.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.scheduler.take() {
            let _ = handle.join();
        }
        log::info!("task scheduler stopped");
    }

    /// Re-read enabled tasks from the store and rebuild the schedule
    /// table. Tasks without a schedule are skipped with a warning;
    /// unparsable schedules are logged and skipped. Returns how many
    /// entries are now scheduled.
    pub fn reload_tasks(&self) -> TaskResult<usize> {
        let store = TaskStore::open(&self.config.db_path)?;
        let tasks = store.enabled_tasks()?;
        let enabled = tasks.len();

        let mut scheduled = Vec::new();
        let now = Utc::now();
        for task in tasks {
            let Some(expr) = task.task_schedule.as_deref() else {
                log::warn!("task {} has no schedule; skipping", task.task_name);
                continue;
            };
            match Schedule::parse(expr) {
                Ok(schedule) => {
                    log::info!("scheduled task {} every {expr}", task.task_name);
                    scheduled.push(ScheduledTask {
                        task_id: task.id,
                        task_name: task.task_name,
                        schedule,
                        next_fire: schedule.next_fire(now),
                    });
                }
                Err(e) => log::error!("scheduling task {} failed: {e}", task.task_name),
            }
        }
        let count = scheduled.len();
        *lock_entries(&self.entries) = scheduled;
        log::info!("reloaded {count} scheduled tasks ({enabled} enabled)");
        Ok(count)
    }

    /// Run a task now on a detached thread. Returns the execution id
    /// for status polling.
    pub fn trigger_task(&self, task_id: TaskId) -> TaskResult<ExecutionId> {
        let store = TaskStore::open(&self.config.db_path)?;
        let task = store
            .get_task(task_id)?
            .ok_or(TaskError::TaskNotFound(task_id))?;
        self.spawn_trigger(&task)
    }

    /// Same as [`trigger_task`](Self::trigger_task), addressed by name.
    pub fn trigger_task_by_name(&self, task_name: &str) -> TaskResult<ExecutionId> {
        let store = TaskStore::open(&self.config.db_path)?;
        let task = store
            .get_task_by_name(task_name)?
            .ok_or_else(|| TaskError::TaskNameNotFound(task_name.to_string()))?;
        self.spawn_trigger(&task)
    }

    fn spawn_trigger(&self, task: &TaskConfig) -> TaskResult<ExecutionId> {
        if !task.enabled {
            return Err(TaskError::TaskDisabled(task.task_name.clone()));
        }
        let execution_id = self.tracker.begin(&task.task_name);
        let config = Arc::clone(&self.config);
        let tracker = self.tracker.clone();
        let id = execution_id.clone();
        let task_id = task.id;
        thread::Builder::new()
            .name(format!("task-trigger-{task_id}"))
            .spawn(move || run_execution(&config, &tracker, &id, task_id))?;
        log::info!(
            "task {} triggered manually (execution {execution_id})",
            task.task_name
        );
        Ok(execution_id)
    }

    pub fn execution_status(&self, execution_id: &str) -> Option<ExecutionStatus> {
        self.tracker.get(execution_id)
    }

    pub fn executions(&self) -> Vec<ExecutionStatus> {
        self.tracker.all()
    }

    /// Enabled tasks straight from the store.
    pub fn list_tasks(&self) -> TaskResult<Vec<TaskConfig>> {
        let store = TaskStore::open(&self.config.db_path)?;
        store.enabled_tasks()
    }
}

impl Drop for TaskContainer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 1 s poll over the schedule table. Due entries are advanced first,
/// then handed to the pool, so a slow execution cannot pile up
/// duplicate submissions of itself within one interval.
fn scheduler_loop(
    config: Arc<ContainerConfig>,
    tracker: ExecutionTracker,
    entries: Arc<Mutex<Vec<ScheduledTask>>>,
    running: Arc<AtomicBool>,
    pool: WorkerPool,
) {
    while running.load(Ordering::SeqCst) {
        let now = Utc::now();
        {
            let mut guard = lock_entries(&entries);
            for entry in guard.iter_mut() {
                if entry.next_fire > now {
                    continue;
                }
                entry.next_fire = entry.schedule.next_fire(now);
                let execution_id = tracker.begin(&entry.task_name);
                log::info!(
                    "task {} is due (execution {execution_id})",
                    entry.task_name
                );
                let config = Arc::clone(&config);
                let tracker_for_job = tracker.clone();
                let id = execution_id.clone();
                let task_id = entry.task_id;
                let submitted = pool.submit(Box::new(move || {
                    run_execution(&config, &tracker_for_job, &id, task_id)
                }));
                if let Err(e) = submitted {
                    log::error!("submitting task {} failed: {e}", entry.task_name);
                    tracker.mark_failed(&execution_id, "worker pool rejected the job");
                }
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
    // Dropping the pool drains queued jobs and joins the workers.
    drop(pool);
    log::debug!("scheduler loop exited");
}

/// Drives one execution through the tracker. Panics from a handler are
/// contained here so a worker thread survives them.
fn run_execution(
    config: &ContainerConfig,
    tracker: &ExecutionTracker,
    execution_id: &str,
    task_id: TaskId,
) {
    tracker.mark_running(execution_id);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| execute_with_session(config, task_id)));
    match outcome {
        Ok(Ok(message)) => {
            log::info!("execution {execution_id} completed: {message}");
            tracker.mark_completed(execution_id, &message);
        }
        Ok(Err(e)) => {
            log::error!("execution {execution_id} failed: {e}");
            tracker.mark_failed(execution_id, &e.to_string());
        }
        Err(_) => {
            log::error!("execution {execution_id} panicked");
            tracker.mark_failed(execution_id, "task execution panicked");
        }
    }
}

/// Session-per-execution: open, fetch, dispatch, drop.
fn execute_with_session(config: &ContainerConfig, task_id: TaskId) -> TaskResult<String> {
    let store = TaskStore::open(&config.db_path)?;
    let task = store
        .get_task(task_id)?
        .ok_or(TaskError::TaskNotFound(task_id))?;
    job::execute(config, &store, &task)
}

// Recovers poisoned locks; the schedule table is plain data.
fn lock_entries(
    entries: &Arc<Mutex<Vec<ScheduledTask>>>,
) -> std::sync::MutexGuard<'_, Vec<ScheduledTask>> {
    entries.lock().unwrap_or_else(|e| e.into_inner())
}
