//! In-memory execution status table.
//!
//! RULE: this table is ephemeral — lost on restart. The durable
//! record of a workflow call lives in the store; this only answers
//! "what is execution X doing right now".

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::types::ExecutionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStatus {
    pub execution_id: ExecutionId,
    pub task_name: String,
    pub state: ExecutionState,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Keyed status table shared between the container surface and
/// execution threads. Cloning shares the underlying table.
#[derive(Clone, Default)]
pub struct ExecutionTracker {
    inner: Arc<Mutex<HashMap<ExecutionId, ExecutionStatus>>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending execution and hand back its id.
    pub fn begin(&self, task_name: &str) -> ExecutionId {
        let id = Uuid::new_v4().to_string();
        let status = ExecutionStatus {
            execution_id: id.clone(),
            task_name: task_name.to_string(),
            state: ExecutionState::Pending,
            message: String::new(),
            started_at: Utc::now(),
            finished_at: None,
        };
        self.lock().insert(id.clone(), status);
        id
    }

    pub fn mark_running(&self, execution_id: &str) {
        if let Some(status) = self.lock().get_mut(execution_id) {
            status.state = ExecutionState::Running;
        }
    }

    pub fn mark_completed(&self, execution_id: &str, message: &str) {
        self.finish(execution_id, ExecutionState::Completed, message);
    }

    pub fn mark_failed(&self, execution_id: &str, message: &str) {
        self.finish(execution_id, ExecutionState::Failed, message);
    }

    /// Snapshot of one execution, None for unknown ids.
    pub fn get(&self, execution_id: &str) -> Option<ExecutionStatus> {
        self.lock().get(execution_id).cloned()
    }

    /// Snapshot of every tracked execution, in no particular order.
    pub fn all(&self) -> Vec<ExecutionStatus> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn finish(&self, execution_id: &str, state: ExecutionState, message: &str) {
        if let Some(status) = self.lock().get_mut(execution_id) {
            status.state = state;
            status.message = message.to_string();
            status.finished_at = Some(Utc::now());
        }
    }

    // Recovers poisoned locks; the table is plain data.
    fn lock(&self) -> MutexGuard<'_, HashMap<ExecutionId, ExecutionStatus>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
