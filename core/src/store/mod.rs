//! SQLite persistence layer.
//!
//! RULE: only the store talks to the database. Jobs and the container
//! call store methods — they never execute SQL directly. Each task
//! execution opens its own connection via [`TaskStore::open`] and
//! drops it when the execution finishes.

mod workflow;

pub use workflow::WorkflowCallResult;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::TaskResult;
use crate::types::TaskId;

/// One task definition: what to run, when, and with what payload.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub id: TaskId,
    pub task_name: String,
    /// Interval expression ("30m", "1h 30m"); None means manual-only.
    pub task_schedule: Option<String>,
    /// JSON payload with a `type` tag; decoded at dispatch time.
    pub task_data: Option<Value>,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

pub struct TaskStore {
    conn: Connection,
}

impl TaskStore {
    pub fn open(path: &str) -> TaskResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> TaskResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> TaskResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Task configs ───────────────────────────────────────────

    pub fn insert_task(
        &self,
        task_name: &str,
        task_schedule: Option<&str>,
        task_data: &Value,
        enabled: bool,
    ) -> TaskResult<TaskId> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO task_configs (task_name, task_schedule, task_data, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task_name,
                task_schedule,
                task_data.to_string(),
                enabled,
                now,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_task(&self, id: TaskId) -> TaskResult<Option<TaskConfig>> {
        let task = self
            .conn
            .query_row(
                "SELECT id, task_name, task_schedule, task_data, enabled, created_at, updated_at
                 FROM task_configs WHERE id = ?1",
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// First task with this name (names are not unique by schema;
    /// lookup resolves to the oldest row).
    pub fn get_task_by_name(&self, name: &str) -> TaskResult<Option<TaskConfig>> {
        let task = self
            .conn
            .query_row(
                "SELECT id, task_name, task_schedule, task_data, enabled, created_at, updated_at
                 FROM task_configs WHERE task_name = ?1 ORDER BY id ASC LIMIT 1",
                params![name],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    pub fn enabled_tasks(&self) -> TaskResult<Vec<TaskConfig>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, task_name, task_schedule, task_data, enabled, created_at, updated_at
             FROM task_configs WHERE enabled = 1 ORDER BY id ASC",
        )?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn all_tasks(&self) -> TaskResult<Vec<TaskConfig>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, task_name, task_schedule, task_data, enabled, created_at, updated_at
             FROM task_configs ORDER BY id ASC",
        )?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Replace a task's payload; false when the id does not exist.
    pub fn update_task_data(&self, id: TaskId, task_data: &Value) -> TaskResult<bool> {
        let changed = self.conn.execute(
            "UPDATE task_configs SET task_data = ?1, updated_at = ?2 WHERE id = ?3",
            params![task_data.to_string(), Utc::now().to_rfc3339(), id],
        )?;
        Ok(changed > 0)
    }

    pub fn set_task_enabled(&self, id: TaskId, enabled: bool) -> TaskResult<bool> {
        let changed = self.conn.execute(
            "UPDATE task_configs SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled, Utc::now().to_rfc3339(), id],
        )?;
        Ok(changed > 0)
    }
}

fn task_from_row(row: &rusqlite::Row) -> rusqlite::Result<TaskConfig> {
    let data: Option<String> = row.get(3)?;
    Ok(TaskConfig {
        id: row.get(0)?,
        task_name: row.get(1)?,
        task_schedule: row.get(2)?,
        // Unreadable payloads degrade to None; dispatch then falls
        // through to default handling instead of wedging the task.
        task_data: data.and_then(|d| serde_json::from_str(&d).ok()),
        enabled: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
