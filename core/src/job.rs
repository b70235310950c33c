//! Task dispatch.
//!
//! task_data carries a `type` tag; everything the handler needs rides
//! in the same JSON object. Unknown or missing tags fall back to the
//! default handler instead of failing the execution.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Deserialize;
use serde_json::Value;

use crate::archive::{unl_gz_to_csv, UnlDownloader};
use crate::config::ContainerConfig;
use crate::error::TaskResult;
use crate::pipeline::{process_csv, ProcessRequest};
use crate::store::{TaskConfig, TaskStore};
use crate::workflow::{BatchApiConfig, BatchApiRunner, HttpWorkflowApi};

/// What a task execution should do, decoded from its task_data.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Aggregate raw transaction extracts into case profiles.
    Aggregation {
        #[serde(default)]
        input_path: Option<String>,
        #[serde(default)]
        output_dir: Option<String>,
    },
    /// Re-post aggregated rows to the workflow API.
    BatchApiCall(BatchApiConfig),
    ReportGeneration {
        #[serde(default)]
        params: Option<Value>,
    },
    #[serde(other)]
    Default,
}

/// Missing task_data or a missing tag select the default handler; a
/// recognized tag with an undecodable payload is logged first.
pub fn decode_task_kind(data: Option<&Value>) -> TaskKind {
    let Some(data) = data else {
        return TaskKind::Default;
    };
    match serde_json::from_value::<TaskKind>(data.clone()) {
        Ok(kind) => kind,
        Err(e) => {
            if data.get("type").is_some() {
                log::warn!("task_data is not a usable task kind ({e}); using the default handler");
            }
            TaskKind::Default
        }
    }
}

/// Runs one task to completion and returns a summary line for the
/// status table.
pub fn execute(config: &ContainerConfig, store: &TaskStore, task: &TaskConfig) -> TaskResult<String> {
    log::info!("executing task {} (id {})", task.task_name, task.id);
    match decode_task_kind(task.task_data.as_ref()) {
        TaskKind::Aggregation {
            input_path,
            output_dir,
        } => handle_aggregation(config, input_path, output_dir),
        TaskKind::BatchApiCall(api_config) => handle_batch_api(store, task, api_config),
        TaskKind::ReportGeneration { params } => {
            log::info!(
                "report generation task {} requested with params {:?}",
                task.task_name,
                params
            );
            Ok("report generation request logged".to_string())
        }
        TaskKind::Default => {
            log::info!(
                "default task {} executed with data {:?}",
                task.task_name,
                task.task_data
            );
            Ok("default task logged".to_string())
        }
    }
}

/// Aggregates each acquired source through the pipeline. Sources come
/// from an explicit input path or from the UNL downloader; `.gz`
/// archives are converted first. Per-source failures are logged and
/// the remaining sources still run.
fn handle_aggregation(
    config: &ContainerConfig,
    input_path: Option<String>,
    output_dir: Option<String>,
) -> TaskResult<String> {
    let downloader = UnlDownloader::from_config(config);
    let (sources, downloaded) = match input_path {
        Some(path) => (vec![PathBuf::from(path)], false),
        None => (downloader.download()?, true),
    };
    if sources.is_empty() {
        log::warn!("aggregation has no input files; nothing to do");
        return Ok("aggregation skipped: no input files acquired".to_string());
    }

    let mut succeeded = 0usize;
    let mut cases = 0usize;
    for source in &sources {
        match aggregate_one(config, source, output_dir.as_deref()) {
            Ok(count) => {
                succeeded += 1;
                cases += count;
            }
            Err(e) => log::error!("aggregating {} failed: {e}", source.display()),
        }
    }
    if downloaded {
        downloader.cleanup(&sources);
    }
    Ok(format!(
        "aggregation finished: {succeeded}/{} sources, {cases} cases",
        sources.len()
    ))
}

fn aggregate_one(
    config: &ContainerConfig,
    source: &Path,
    output_dir: Option<&str>,
) -> TaskResult<usize> {
    let is_gz = source
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    let csv_path = if is_gz {
        unl_gz_to_csv(source)?
    } else {
        source.to_path_buf()
    };

    let output_path = match output_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let stem = csv_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "input".to_string());
            let stamp = Local::now().format("%Y%m%d_%H%M%S");
            Some(Path::new(dir).join(format!("processed_{stem}_{stamp}.csv")))
        }
        None => None,
    };

    let request = ProcessRequest {
        csv_file_path: Some(csv_path),
        csv_content: None,
        output_path,
    };
    let outcome = process_csv(config, &request);
    if !outcome.success {
        return Err(anyhow::anyhow!("{}", outcome.message).into());
    }
    log::info!("{}", outcome.message);
    Ok(outcome.processed_count)
}

fn handle_batch_api(
    store: &TaskStore,
    task: &TaskConfig,
    api_config: BatchApiConfig,
) -> TaskResult<String> {
    let dir = PathBuf::from(&api_config.csv_file_path);
    let api = HttpWorkflowApi::new(api_config)?;
    let runner = BatchApiRunner::new(&api, store, task.id);
    let stats = runner.process_directory(&dir)?;
    Ok(format!(
        "batch api call finished: {} files, {} rows posted, {} rows failed",
        stats.files, stats.posted, stats.failed
    ))
}

// ── Tests ───────────────────────────────────────────────────────────
