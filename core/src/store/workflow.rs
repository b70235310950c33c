//! Workflow call-result persistence: one row per upload/run attempt.

use chrono::Utc;
use rusqlite::params;
use serde_json::Value;

use super::TaskStore;
use crate::error::TaskResult;
use crate::types::TaskId;

/// Durable record of one workflow API call.
#[derive(Debug, Clone)]
pub struct WorkflowCallResult {
    pub id: i64,
    pub task_id: TaskId,
    pub case_id: Option<String>,
    pub upload_response: Option<Value>,
    pub run_response: Option<Value>,
    pub parsed_result: Option<String>,
    pub status: String,
    pub execution_time: String,
}

impl TaskStore {
    pub fn insert_call_result(
        &self,
        task_id: TaskId,
        case_id: Option<&str>,
        upload_response: &Value,
        run_response: Option<&Value>,
        parsed_result: Option<&str>,
        status: &str,
    ) -> TaskResult<i64> {
        self.conn().execute(
            "INSERT INTO workflow_call_results
                 (task_id, case_id, upload_response, run_response, parsed_result, status, execution_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task_id,
                case_id,
                upload_response.to_string(),
                run_response.map(|v| v.to_string()),
                parsed_result,
                status,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn call_results_for_case(&self, case_id: &str) -> TaskResult<Vec<WorkflowCallResult>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, task_id, case_id, upload_response, run_response, parsed_result, status, execution_time
             FROM workflow_call_results WHERE case_id = ?1 ORDER BY id ASC",
        )?;
        let results = stmt
            .query_map(params![case_id], call_result_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(results)
    }

    pub fn call_results_for_task(&self, task_id: TaskId) -> TaskResult<Vec<WorkflowCallResult>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, task_id, case_id, upload_response, run_response, parsed_result, status, execution_time
             FROM workflow_call_results WHERE task_id = ?1 ORDER BY id ASC",
        )?;
        let results = stmt
            .query_map(params![task_id], call_result_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(results)
    }

    pub fn count_call_results_by_status(&self, status: &str) -> TaskResult<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM workflow_call_results WHERE status = ?1",
            params![status],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn call_result_from_row(row: &rusqlite::Row) -> rusqlite::Result<WorkflowCallResult> {
    let upload: Option<String> = row.get(3)?;
    let run: Option<String> = row.get(4)?;
    Ok(WorkflowCallResult {
        id: row.get(0)?,
        task_id: row.get(1)?,
        case_id: row.get(2)?,
        upload_response: upload.and_then(|v| serde_json::from_str(&v).ok()),
        run_response: run.and_then(|v| serde_json::from_str(&v).ok()),
        parsed_result: row.get(5)?,
        status: row.get(6)?,
        execution_time: row.get(7)?,
    })
}
