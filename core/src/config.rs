//! Environment-sourced container configuration.
//!
//! Values are read once at startup; there is no hot reload. Every
//! knob has a working default so a bare environment still runs.

use std::env;
use std::path::PathBuf;

/// Rows per chunk in the aggregation pipeline.
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

/// Concurrent task executions in the worker pool.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 3;

#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// SQLite file holding task configs and workflow call results.
    pub db_path: String,
    /// Rows buffered per chunk before mapping and dedup run.
    pub chunk_size: usize,
    /// Where converted inputs and default output files land.
    pub temp_dir: PathBuf,
    /// Upper bound on concurrently running scheduled executions.
    pub worker_concurrency: usize,
    /// UNL download collaborator settings; empty strings mean "not
    /// configured" and the downloader reports that instead of failing.
    pub unl_download_url: String,
    pub unl_file_names: Vec<String>,
    pub unl_file_svr_id: String,
    pub unl_rmt_pub_path: String,
}

impl ContainerConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("TASK_DB_PATH").unwrap_or_else(|_| "task_container.db".to_string()),
            chunk_size: env_usize("CSV_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
            temp_dir: env::var("CSV_PROCESSING_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("csv_processing")),
            worker_concurrency: env_usize("TASK_WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY),
            unl_download_url: env::var("UNL_DOWNLOAD_URL").unwrap_or_default(),
            unl_file_names: env_list("UNL_FILE_NAME_LIST"),
            unl_file_svr_id: env::var("UNL_FILE_SVR_ID").unwrap_or_default(),
            unl_rmt_pub_path: env::var("UNL_RMT_PUB_PATH").unwrap_or_default(),
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            db_path: "task_container.db".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            temp_dir: env::temp_dir().join("csv_processing"),
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            unl_download_url: String::new(),
            unl_file_names: Vec::new(),
            unl_file_svr_id: String::new(),
            unl_rmt_pub_path: String::new(),
        }
    }
}

/// Parse a positive integer from the environment, keeping the default
/// for unset, unparsable, or zero values.
fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(default)
}

/// Comma-separated list variable; empty entries are dropped.
fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
