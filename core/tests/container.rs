//! Integration tests for the task container: store round-trips,
//! schedules, the worker pool bound, the status table, and manual
//! trigger flows end to end.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use caseflow_core::config::ContainerConfig;
use caseflow_core::container::TaskContainer;
use caseflow_core::error::TaskError;
use caseflow_core::scheduler::{Schedule, WorkerPool};
use caseflow_core::status::{ExecutionState, ExecutionStatus, ExecutionTracker};
use caseflow_core::store::TaskStore;
use serde_json::json;
use tempfile::TempDir;

// ── Helpers ──────────────────────────────────────────────────────────

fn memory_store() -> TaskStore {
    let store = TaskStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
}

fn file_config(dir: &TempDir) -> ContainerConfig {
    ContainerConfig {
        db_path: dir.path().join("tasks.db").to_string_lossy().to_string(),
        temp_dir: dir.path().to_path_buf(),
        ..ContainerConfig::default()
    }
}

fn wait_terminal(container: &TaskContainer, execution_id: &str) -> ExecutionStatus {
    for _ in 0..200 {
        if let Some(status) = container.execution_status(execution_id) {
            if matches!(
                status.state,
                ExecutionState::Completed | ExecutionState::Failed
            ) {
                return status;
            }
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("execution {execution_id} did not finish in time");
}

// ── Task store ───────────────────────────────────────────────────────

/// Insert/get round-trips every column, including the JSON payload.
#[test]
fn store_round_trips_task_configs() {
    let store = memory_store();
    let data = json!({"type": "aggregation", "input_path": "/data/in.csv"});
    let id = store
        .insert_task("daily-aggregation", Some("30m"), &data, true)
        .unwrap();

    let task = store.get_task(id).unwrap().expect("task should exist");
    assert_eq!(task.task_name, "daily-aggregation");
    assert_eq!(task.task_schedule.as_deref(), Some("30m"));
    assert_eq!(task.task_data, Some(data));
    assert!(task.enabled);
    assert!(store.get_task(id + 99).unwrap().is_none());
}

/// Name lookup resolves to the oldest row when names collide.
#[test]
fn store_name_lookup_prefers_the_oldest_task() {
    let store = memory_store();
    let first = store
        .insert_task("repost", None, &json!({"v": 1}), true)
        .unwrap();
    store
        .insert_task("repost", None, &json!({"v": 2}), true)
        .unwrap();

    let task = store.get_task_by_name("repost").unwrap().unwrap();
    assert_eq!(task.id, first);
    assert!(store.get_task_by_name("missing").unwrap().is_none());
}

/// enabled_tasks filters; set_task_enabled and update_task_data
/// report whether a row changed.
#[test]
fn store_enable_and_update_flow() {
    let store = memory_store();
    let a = store.insert_task("a", None, &json!({}), true).unwrap();
    let b = store.insert_task("b", None, &json!({}), false).unwrap();

    let enabled = store.enabled_tasks().unwrap();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].id, a);
    assert_eq!(store.all_tasks().unwrap().len(), 2);

    assert!(store.set_task_enabled(b, true).unwrap());
    assert_eq!(store.enabled_tasks().unwrap().len(), 2);
    assert!(!store.set_task_enabled(b + 99, true).unwrap());

    assert!(store.update_task_data(a, &json!({"type": "default"})).unwrap());
    let task = store.get_task(a).unwrap().unwrap();
    assert_eq!(task.task_data, Some(json!({"type": "default"})));
}

/// Workflow call results persist per task and are queryable by case
/// and by status.
#[test]
fn store_records_workflow_call_results() {
    let store = memory_store();
    let task_id = store.insert_task("repost", None, &json!({}), true).unwrap();

    let upload = json!({"status_code": 201, "content": "{\"id\":\"f-1\"}"});
    let run = json!({"status_code": 200, "content": "{}"});
    store
        .insert_call_result(
            task_id,
            Some("CASE-1"),
            &upload,
            Some(&run),
            Some("案例可疑"),
            "completed",
        )
        .unwrap();
    store
        .insert_call_result(task_id, Some("CASE-2"), &upload, None, None, "failed")
        .unwrap();

    let for_case = store.call_results_for_case("CASE-1").unwrap();
    assert_eq!(for_case.len(), 1);
    assert_eq!(for_case[0].parsed_result.as_deref(), Some("案例可疑"));
    assert_eq!(for_case[0].upload_response, Some(upload));

    assert_eq!(store.call_results_for_task(task_id).unwrap().len(), 2);
    assert_eq!(store.count_call_results_by_status("completed").unwrap(), 1);
    assert_eq!(store.count_call_results_by_status("failed").unwrap(), 1);
}

// ── Schedules ────────────────────────────────────────────────────────

/// Humantime expressions parse into intervals; zero and garbage are
/// rejected as invalid schedules.
#[test]
fn schedule_parsing_accepts_humantime_intervals() {
    assert_eq!(
        Schedule::parse("30m").unwrap().interval(),
        Duration::from_secs(1800)
    );
    assert_eq!(
        Schedule::parse(" 1h 30m ").unwrap().interval(),
        Duration::from_secs(5400)
    );
    assert!(matches!(
        Schedule::parse("0s"),
        Err(TaskError::InvalidSchedule { .. })
    ));
    assert!(matches!(
        Schedule::parse("whenever"),
        Err(TaskError::InvalidSchedule { .. })
    ));
}

/// next_fire lands exactly one interval after the reference time.
#[test]
fn schedule_next_fire_steps_by_the_interval() {
    let schedule = Schedule::parse("45s").unwrap();
    let now = chrono::Utc::now();
    let next = schedule.next_fire(now);
    assert_eq!(next - now, chrono::Duration::seconds(45));
}

// ── Worker pool ──────────────────────────────────────────────────────

/// All submitted jobs complete, and no more than `size` run at once.
#[test]
fn worker_pool_bounds_concurrency_and_drains() {
    let mut pool = WorkerPool::new(3).unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..12 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        let done = Arc::clone(&done);
        pool.submit(Box::new(move || {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            running.fetch_sub(1, Ordering::SeqCst);
            done.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    }
    pool.shutdown();

    assert_eq!(done.load(Ordering::SeqCst), 12, "shutdown must drain");
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency was {peak}");
    assert!(peak >= 1);
}

/// Submitting after shutdown is an error instead of a silent drop.
#[test]
fn worker_pool_rejects_jobs_after_shutdown() {
    let mut pool = WorkerPool::new(1).unwrap();
    pool.shutdown();
    assert!(pool.submit(Box::new(|| {})).is_err());
}

// ── Execution tracker ────────────────────────────────────────────────

/// Pending → Running → Completed, with the finish timestamp set and
/// clones sharing the same table.
#[test]
fn tracker_tracks_the_execution_lifecycle() {
    let tracker = ExecutionTracker::new();
    let id = tracker.begin("daily-aggregation");

    let status = tracker.get(&id).unwrap();
    assert_eq!(status.state, ExecutionState::Pending);
    assert_eq!(status.task_name, "daily-aggregation");
    assert!(status.finished_at.is_none());

    tracker.mark_running(&id);
    assert_eq!(tracker.get(&id).unwrap().state, ExecutionState::Running);

    let shared = tracker.clone();
    shared.mark_completed(&id, "3 cases");
    let status = tracker.get(&id).unwrap();
    assert_eq!(status.state, ExecutionState::Completed);
    assert_eq!(status.message, "3 cases");
    assert!(status.finished_at.is_some());

    assert_eq!(tracker.len(), 1);
    assert!(tracker.get("no-such-execution").is_none());
}

// ── Container trigger flows ──────────────────────────────────────────

/// A manual trigger runs the task on a detached thread and lands in
/// Completed; untyped task_data goes through the default handler.
#[test]
fn trigger_by_name_runs_to_completion() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir);
    let container = TaskContainer::new(config.clone()).unwrap();

    let store = TaskStore::open(&config.db_path).unwrap();
    store
        .insert_task("noop", None, &json!({"note": "untyped"}), true)
        .unwrap();

    let execution_id = container.trigger_task_by_name("noop").unwrap();
    let status = wait_terminal(&container, &execution_id);
    assert_eq!(status.state, ExecutionState::Completed);
    assert_eq!(status.message, "default task logged");
}

/// A triggered aggregation task converts its input through the whole
/// pipeline and reports the case count.
#[test]
fn triggered_aggregation_task_writes_output() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir);
    let container = TaskContainer::new(config.clone()).unwrap();

    let input = dir.path().join("extract.csv");
    let mut cells = vec![String::new(); 62];
    cells[0] = "CASE-1".to_string();
    cells[3] = "王五".to_string();
    cells[22] = "K1".to_string();
    cells[24] = "2024-01-01 10:00:00".to_string();
    cells[37] = "150".to_string();
    fs::write(&input, cells.join(",")).unwrap();
    let out_dir = dir.path().join("profiles");

    let store = TaskStore::open(&config.db_path).unwrap();
    store
        .insert_task(
            "one-shot-aggregation",
            None,
            &json!({
                "type": "aggregation",
                "input_path": input.to_string_lossy(),
                "output_dir": out_dir.to_string_lossy(),
            }),
            true,
        )
        .unwrap();

    let execution_id = container.trigger_task_by_name("one-shot-aggregation").unwrap();
    let status = wait_terminal(&container, &execution_id);
    assert_eq!(
        status.state,
        ExecutionState::Completed,
        "message: {}",
        status.message
    );
    assert!(status.message.contains("1/1 sources"));

    let written: Vec<_> = fs::read_dir(&out_dir).unwrap().collect();
    assert_eq!(written.len(), 1, "one output file per source");
}

/// Unknown and disabled tasks are trigger errors, not silent no-ops.
#[test]
fn trigger_rejects_unknown_and_disabled_tasks() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir);
    let container = TaskContainer::new(config.clone()).unwrap();

    assert!(matches!(
        container.trigger_task_by_name("ghost"),
        Err(TaskError::TaskNameNotFound(_))
    ));
    assert!(matches!(
        container.trigger_task(424242),
        Err(TaskError::TaskNotFound(424242))
    ));

    let store = TaskStore::open(&config.db_path).unwrap();
    let id = store
        .insert_task("paused", None, &json!({}), false)
        .unwrap();
    assert!(matches!(
        container.trigger_task(id),
        Err(TaskError::TaskDisabled(_))
    ));
}

/// reload_tasks schedules only enabled tasks with a parsable interval.
#[test]
fn reload_schedules_only_usable_tasks() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir);
    let container = TaskContainer::new(config.clone()).unwrap();

    let store = TaskStore::open(&config.db_path).unwrap();
    store
        .insert_task("scheduled", Some("10m"), &json!({}), true)
        .unwrap();
    store
        .insert_task("manual-only", None, &json!({}), true)
        .unwrap();
    store
        .insert_task("bad-schedule", Some("whenever"), &json!({}), true)
        .unwrap();
    store
        .insert_task("disabled", Some("10m"), &json!({}), false)
        .unwrap();

    assert_eq!(container.reload_tasks().unwrap(), 1);
    assert_eq!(container.list_tasks().unwrap().len(), 3);
}
