//! Outbound workflow API collaborator.
//!
//! The transport sits behind [`WorkflowApi`]: upload returns a file
//! identifier (or a failure status), run returns status and body. The
//! batch runner assumes nothing more — in particular, no retries.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::TaskResult;
use crate::store::TaskStore;
use crate::types::TaskId;

const HTTP_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_WORKFLOW_USER: &str = "ma";

/// Connection settings for one batch-api task, decoded from task_data.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchApiConfig {
    pub api_endpoint: String,
    /// Directory of aggregated output CSVs to re-post.
    pub csv_file_path: String,
    #[serde(rename = "API-KEY", default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub workflow_run_endpoint: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

impl BatchApiConfig {
    /// Run endpoint defaults to `{api_endpoint}/workflows/run`.
    pub fn run_endpoint(&self) -> String {
        self.workflow_run_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/workflows/run", self.api_endpoint))
    }

    fn workflow_user(&self) -> String {
        self.user
            .clone()
            .unwrap_or_else(|| DEFAULT_WORKFLOW_USER.to_string())
    }
}

/// Upload outcome: HTTP status, raw body, and the extracted file id.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub status: u16,
    pub body: String,
    pub file_id: Option<String>,
}

/// Workflow-run outcome: HTTP status and raw body.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: u16,
    pub body: String,
}

/// The network seam. Implementations return Ok for any HTTP response
/// (the status travels in the outcome); Err means the call itself
/// could not be made.
pub trait WorkflowApi {
    fn upload_file(
        &self,
        file_name: &str,
        content: Vec<u8>,
        fields: &[(String, String)],
    ) -> TaskResult<UploadOutcome>;

    fn run_workflow(&self, file_id: &str) -> TaskResult<RunOutcome>;
}

/// Blocking HTTP implementation against a Dify-style workflow server.
pub struct HttpWorkflowApi {
    client: reqwest::blocking::Client,
    config: BatchApiConfig,
}

impl HttpWorkflowApi {
    pub fn new(config: BatchApiConfig) -> TaskResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    fn bearer(&self) -> String {
        match &self.config.api_key {
            Some(key) => format!("Bearer {key}"),
            None => String::new(),
        }
    }
}

impl WorkflowApi for HttpWorkflowApi {
    fn upload_file(
        &self,
        file_name: &str,
        content: Vec<u8>,
        fields: &[(String, String)],
    ) -> TaskResult<UploadOutcome> {
        let part = reqwest::blocking::multipart::Part::bytes(content)
            .file_name(file_name.to_string())
            .mime_str("text/csv")?;
        let mut form = reqwest::blocking::multipart::Form::new().part("file", part);
        for (key, value) in fields {
            form = form.text(key.clone(), value.clone());
        }
        let response = self
            .client
            .post(format!("{}/files/upload", self.config.api_endpoint))
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .multipart(form)
            .send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        let file_id = extract_file_id(&body);
        Ok(UploadOutcome {
            status,
            body,
            file_id,
        })
    }

    fn run_workflow(&self, file_id: &str) -> TaskResult<RunOutcome> {
        let payload = json!({
            "inputs": {
                "AML_message": {
                    "transfer_method": "local_file",
                    "upload_file_id": file_id,
                    "type": "document"
                }
            },
            "response_mode": "blocking",
            "user": self.config.workflow_user(),
        });
        let response = self
            .client
            .post(self.config.run_endpoint())
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .json(&payload)
            .send()?;
        Ok(RunOutcome {
            status: response.status().as_u16(),
            body: response.text()?,
        })
    }
}

/// Pull the uploaded file id out of an upload response body.
pub fn extract_file_id(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Extract `data.outputs.RES` from a workflow-run body. RES is the
/// terminal-node variable assignment on the workflow side.
pub fn parse_workflow_result(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let res = value.get("data")?.get("outputs")?.get("RES")?;
    match res {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Outcome counters for one directory pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchStats {
    pub files: usize,
    pub posted: usize,
    pub failed: usize,
}

/// Re-posts aggregated case rows, one single-row CSV document per
/// workflow call, and persists every call's outcome.
pub struct BatchApiRunner<'a> {
    api: &'a dyn WorkflowApi,
    store: &'a TaskStore,
    task_id: TaskId,
}

impl<'a> BatchApiRunner<'a> {
    pub fn new(api: &'a dyn WorkflowApi, store: &'a TaskStore, task_id: TaskId) -> Self {
        Self {
            api,
            store,
            task_id,
        }
    }

    /// Walk `dir` for CSV files (name order) and post every data row.
    /// File-level failures are logged; the rest of the batch proceeds.
    pub fn process_directory(&self, dir: &Path) -> TaskResult<BatchStats> {
        if !dir.is_dir() {
            return Err(anyhow::anyhow!("CSV directory does not exist: {}", dir.display()).into());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut stats = BatchStats::default();
        if paths.is_empty() {
            log::warn!("no CSV files found in {}", dir.display());
            return Ok(stats);
        }
        for path in paths {
            stats.files += 1;
            if let Err(e) = self.process_file(&path, &mut stats) {
                log::error!("CSV file {} failed: {e}", path.display());
            }
        }
        log::info!(
            "batch finished: {} files, {} rows posted, {} rows failed",
            stats.files,
            stats.posted,
            stats.failed
        );
        Ok(stats)
    }

    /// Post each data row of one aggregated CSV. A leading header row
    /// (first cell "case_id", BOM tolerated) is skipped.
    pub fn process_file(&self, path: &Path, stats: &mut BatchStats) -> TaskResult<()> {
        log::info!("posting rows from {}", path.display());
        let bytes = fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes);
        let content = content.trim_start_matches('\u{feff}');

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(content.as_bytes());

        for (row_idx, record) in reader.records().enumerate() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("skipping unreadable row {} of {}: {e}", row_idx + 1, path.display());
                    continue;
                }
            };
            if row_idx == 0 && record.get(0) == Some("case_id") {
                continue;
            }
            match self.post_row(path, row_idx, &record) {
                Ok(true) => stats.posted += 1,
                Ok(false) => stats.failed += 1,
                Err(e) => {
                    stats.failed += 1;
                    log::error!("row {} of {} failed: {e}", row_idx + 1, path.display());
                }
            }
        }
        Ok(())
    }

    /// Returns whether the call chain completed. A rejected upload is
    /// persisted as failed and reported as `false`, not as an error.
    fn post_row(&self, path: &Path, row_idx: usize, record: &csv::StringRecord) -> TaskResult<bool> {
        let case_id = if record.len() >= 5 {
            record.get(0).unwrap_or("N/A").to_string()
        } else {
            "N/A".to_string()
        };

        // One-row CSV document: synthesized positional header + row.
        let mut document = Vec::new();
        {
            let mut writer = csv::Writer::from_writer(&mut document);
            let header: Vec<String> = (0..record.len()).map(|i| format!("column_{i}")).collect();
            writer.write_record(&header)?;
            writer.write_record(record)?;
            writer.flush()?;
        }

        let file_name = format!(
            "row_{}_{}",
            row_idx + 1,
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        );
        let fields: Vec<(String, String)> = record
            .iter()
            .enumerate()
            .map(|(i, value)| (format!("column_{i}"), value.to_string()))
            .collect();

        let upload = self.api.upload_file(&file_name, document, &fields)?;
        log::info!(
            "upload result (file {file_name}, case {case_id}): {}",
            upload.status
        );

        let run = if matches!(upload.status, 200 | 201) {
            match upload.file_id.as_deref() {
                Some(file_id) => Some(self.api.run_workflow(file_id)?),
                None => {
                    log::warn!("no file id in upload response; skipping workflow run ({file_name})");
                    None
                }
            }
        } else {
            None
        };

        let parsed = run.as_ref().and_then(|r| parse_workflow_result(&r.body));
        if let Some(run) = &run {
            log::info!(
                "workflow run result (file {file_name}, case {case_id}): {}",
                run.status
            );
        }

        let upload_json = json!({ "status_code": upload.status, "content": upload.body });
        let run_json = run
            .as_ref()
            .map(|r| json!({ "status_code": r.status, "content": r.body }));
        let completed = matches!(upload.status, 200 | 201);
        self.store.insert_call_result(
            self.task_id,
            Some(&case_id),
            &upload_json,
            run_json.as_ref(),
            parsed.as_deref(),
            if completed { "completed" } else { "failed" },
        )?;
        Ok(completed)
    }
}
