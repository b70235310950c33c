//! Integration tests for the batch workflow runner against a recorded
//! in-process API, plus the response-parsing helpers.

use std::fs;
use std::sync::Mutex;

use caseflow_core::error::TaskResult;
use caseflow_core::store::TaskStore;
use caseflow_core::workflow::{
    extract_file_id, parse_workflow_result, BatchApiRunner, BatchStats, RunOutcome, UploadOutcome,
    WorkflowApi,
};
use serde_json::json;
use tempfile::TempDir;

// ── Mock API ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct RecordedUpload {
    file_name: String,
    document: Vec<u8>,
    fields: Vec<(String, String)>,
}

/// Canned-response API that records every call it receives.
struct MockWorkflowApi {
    upload_status: u16,
    upload_body: String,
    file_id: Option<String>,
    run_body: String,
    uploads: Mutex<Vec<RecordedUpload>>,
    runs: Mutex<Vec<String>>,
}

impl MockWorkflowApi {
    fn accepting() -> Self {
        Self {
            upload_status: 201,
            upload_body: r#"{"id":"file-1"}"#.to_string(),
            file_id: Some("file-1".to_string()),
            run_body: r#"{"data":{"outputs":{"RES":"命中规则"}}}"#.to_string(),
            uploads: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
        }
    }

    fn rejecting() -> Self {
        Self {
            upload_status: 500,
            upload_body: r#"{"error":"storage unavailable"}"#.to_string(),
            file_id: None,
            run_body: "{}".to_string(),
            uploads: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
        }
    }

    fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    fn upload(&self, idx: usize) -> RecordedUpload {
        self.uploads.lock().unwrap()[idx].clone()
    }

    fn run_ids(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }
}

impl WorkflowApi for MockWorkflowApi {
    fn upload_file(
        &self,
        file_name: &str,
        content: Vec<u8>,
        fields: &[(String, String)],
    ) -> TaskResult<UploadOutcome> {
        self.uploads.lock().unwrap().push(RecordedUpload {
            file_name: file_name.to_string(),
            document: content,
            fields: fields.to_vec(),
        });
        Ok(UploadOutcome {
            status: self.upload_status,
            body: self.upload_body.clone(),
            file_id: self.file_id.clone(),
        })
    }

    fn run_workflow(&self, file_id: &str) -> TaskResult<RunOutcome> {
        self.runs.lock().unwrap().push(file_id.to_string());
        Ok(RunOutcome {
            status: 200,
            body: self.run_body.clone(),
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn store_with_task() -> (TaskStore, i64) {
    let store = TaskStore::in_memory().unwrap();
    store.migrate().unwrap();
    let task_id = store
        .insert_task("workflow-repost", None, &json!({}), true)
        .unwrap();
    (store, task_id)
}

// ── Runner ───────────────────────────────────────────────────────────

/// Each data row becomes one upload plus one workflow run; the output
/// header row and its BOM are not posted.
#[test]
fn posts_each_data_row_and_skips_the_header() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("profiles.csv");
    fs::write(
        &path,
        "\u{feff}case_id,main_cust_id,main_cust_name,acc_num,total_trans_count\n\
         C-1,M-1,张三,A-1,3\n\
         C-2,M-2,李四,A-2,5\n",
    )
    .unwrap();

    let (store, task_id) = store_with_task();
    let api = MockWorkflowApi::accepting();
    let runner = BatchApiRunner::new(&api, &store, task_id);

    let mut stats = BatchStats::default();
    runner.process_file(&path, &mut stats).unwrap();
    assert_eq!(stats.posted, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(api.upload_count(), 2);

    let first = api.upload(0);
    assert_eq!(first.file_name, "row_2_profiles.csv");
    assert_eq!(first.fields.len(), 5);
    assert_eq!(first.fields[0], ("column_0".to_string(), "C-1".to_string()));
    assert_eq!(first.fields[2], ("column_2".to_string(), "张三".to_string()));

    // The uploaded document is a one-row CSV under a synthesized header.
    let mut doc = csv::Reader::from_reader(first.document.as_slice());
    let headers = doc.headers().unwrap().clone();
    assert_eq!(headers.get(0), Some("column_0"));
    let rows: Vec<csv::StringRecord> = doc.records().collect::<Result<_, _>>().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), Some("C-1"));

    assert_eq!(api.run_ids(), vec!["file-1", "file-1"]);

    let results = store.call_results_for_task(task_id).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].case_id.as_deref(), Some("C-1"));
    assert_eq!(results[0].status, "completed");
    assert_eq!(results[0].parsed_result.as_deref(), Some("命中规则"));
    assert_eq!(
        results[0].upload_response,
        Some(json!({"status_code": 201, "content": r#"{"id":"file-1"}"#}))
    );
    assert_eq!(results[1].case_id.as_deref(), Some("C-2"));
}

/// A rejected upload skips the workflow run and lands in the store as
/// a failed call, not as a runner error.
#[test]
fn rejected_uploads_are_persisted_as_failed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("profiles.csv");
    fs::write(&path, "C-9,M-9,王五,A-9,1\n").unwrap();

    let (store, task_id) = store_with_task();
    let api = MockWorkflowApi::rejecting();
    let runner = BatchApiRunner::new(&api, &store, task_id);

    let mut stats = BatchStats::default();
    runner.process_file(&path, &mut stats).unwrap();
    assert_eq!(stats.posted, 0);
    assert_eq!(stats.failed, 1);
    assert!(api.run_ids().is_empty(), "no run without a file id");

    let results = store.call_results_for_task(task_id).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, "failed");
    assert_eq!(results[0].case_id.as_deref(), Some("C-9"));
    assert!(results[0].run_response.is_none());
    assert!(results[0].parsed_result.is_none());
}

/// Rows too short to carry a case id are posted under a placeholder.
#[test]
fn short_rows_carry_a_placeholder_case_id() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("narrow.csv");
    fs::write(&path, "a,b,c\n").unwrap();

    let (store, task_id) = store_with_task();
    let api = MockWorkflowApi::accepting();
    let runner = BatchApiRunner::new(&api, &store, task_id);

    let mut stats = BatchStats::default();
    runner.process_file(&path, &mut stats).unwrap();
    assert_eq!(stats.posted, 1);

    let results = store.call_results_for_task(task_id).unwrap();
    assert_eq!(results[0].case_id.as_deref(), Some("N/A"));
}

/// Directory passes walk CSV files in name order and leave other
/// extensions alone; a missing directory is an error.
#[test]
fn directory_pass_orders_files_and_ignores_other_extensions() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("b.csv"), "B-1,x,x,x,1\n").unwrap();
    fs::write(dir.path().join("a.csv"), "A-1,x,x,x,1\n").unwrap();
    fs::write(dir.path().join("readme.txt"), "not a profile\n").unwrap();

    let (store, task_id) = store_with_task();
    let api = MockWorkflowApi::accepting();
    let runner = BatchApiRunner::new(&api, &store, task_id);

    let stats = runner.process_directory(dir.path()).unwrap();
    assert_eq!(stats.files, 2);
    assert_eq!(stats.posted, 2);
    assert_eq!(api.upload(0).fields[0].1, "A-1");
    assert_eq!(api.upload(1).fields[0].1, "B-1");

    assert!(runner.process_directory(&dir.path().join("missing")).is_err());
}

/// An empty directory finishes with zeroed stats instead of failing.
#[test]
fn empty_directory_reports_zero_files() {
    let dir = TempDir::new().unwrap();
    let (store, task_id) = store_with_task();
    let api = MockWorkflowApi::accepting();
    let runner = BatchApiRunner::new(&api, &store, task_id);

    let stats = runner.process_directory(dir.path()).unwrap();
    assert_eq!(stats.files, 0);
    assert_eq!(stats.posted, 0);
}

// ── Response parsing ─────────────────────────────────────────────────

/// Upload responses carry the file id as a string or a number.
#[test]
fn file_id_extraction_handles_both_id_shapes() {
    assert_eq!(
        extract_file_id(r#"{"id":"abc-123"}"#).as_deref(),
        Some("abc-123")
    );
    assert_eq!(extract_file_id(r#"{"id":42}"#).as_deref(), Some("42"));
    assert_eq!(extract_file_id(r#"{"name":"x"}"#), None);
    assert_eq!(extract_file_id("not json at all"), None);
}

/// The RES output comes back as a plain string, another JSON shape
/// (serialized), or null (absent).
#[test]
fn workflow_result_parsing_follows_the_res_output() {
    assert_eq!(
        parse_workflow_result(r#"{"data":{"outputs":{"RES":"案例可疑"}}}"#).as_deref(),
        Some("案例可疑")
    );
    assert_eq!(
        parse_workflow_result(r#"{"data":{"outputs":{"RES":{"level":2}}}}"#).as_deref(),
        Some(r#"{"level":2}"#)
    );
    assert_eq!(
        parse_workflow_result(r#"{"data":{"outputs":{"RES":3}}}"#).as_deref(),
        Some("3")
    );
    assert_eq!(
        parse_workflow_result(r#"{"data":{"outputs":{"RES":null}}}"#),
        None
    );
    assert_eq!(parse_workflow_result(r#"{"data":{"outputs":{}}}"#), None);
    assert_eq!(parse_workflow_result("garbage"), None);
}
