//! UNL archive acquisition and conversion.
//!
//! Upstream exports transaction extracts as gzipped UNL: one record per
//! line, fields separated by 0x07. Conversion rewrites them as plain
//! CSV next to the archive so the pipeline can read them.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use serde_json::{json, Value};

use crate::config::ContainerConfig;
use crate::error::TaskResult;

/// UNL field separator (BEL).
pub const UNL_FIELD_SEPARATOR: char = '\x07';

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Converts a `.unl.gz` archive to a sibling `.csv` file and returns
/// its path. Empty lines are dropped; everything else is split on the
/// UNL separator and re-encoded as CSV.
pub fn unl_gz_to_csv(input_path: &Path) -> TaskResult<PathBuf> {
    let output_path = csv_sibling(input_path);
    let reader = BufReader::new(GzDecoder::new(File::open(input_path)?));
    // UNL lines are not guaranteed a uniform field count.
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(&output_path)?;
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(UNL_FIELD_SEPARATOR).collect();
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    log::info!(
        "converted {} to {}",
        input_path.display(),
        output_path.display()
    );
    Ok(output_path)
}

/// `foo.unl.gz` maps to `foo.csv`; a single extension is stripped for
/// anything else.
fn csv_sibling(input_path: &Path) -> PathBuf {
    let stem = input_path.with_extension("");
    let stem = if stem.extension().and_then(|e| e.to_str()) == Some("unl") {
        stem.with_extension("")
    } else {
        stem
    };
    stem.with_extension("csv")
}

/// Fetches UNL archives from the file server configured in the
/// environment. All failures degrade to an empty result after logging;
/// a scheduled aggregation run must not abort on a flaky file server.
pub struct UnlDownloader {
    url: String,
    file_names: Vec<String>,
    file_svr_id: String,
    rmt_pub_path: String,
    temp_dir: PathBuf,
}

impl UnlDownloader {
    pub fn from_config(config: &ContainerConfig) -> Self {
        Self {
            url: config.unl_download_url.clone(),
            file_names: config.unl_file_names.clone(),
            file_svr_id: config.unl_file_svr_id.clone(),
            rmt_pub_path: config.unl_rmt_pub_path.clone(),
            temp_dir: config.temp_dir.clone(),
        }
    }

    pub fn config_complete(&self) -> bool {
        if self.url.is_empty() {
            log::error!("UNL_DOWNLOAD_URL is not configured");
            return false;
        }
        if self.file_names.is_empty() {
            log::error!("UNL_FILE_NAME_LIST is not configured");
            return false;
        }
        if self.file_svr_id.is_empty() {
            log::error!("UNL_FILE_SVR_ID is not configured");
            return false;
        }
        if self.rmt_pub_path.is_empty() {
            log::error!("UNL_RMT_PUB_PATH is not configured");
            return false;
        }
        true
    }

    /// Requests the configured archives and returns local paths of
    /// whatever was saved. The server answers either with the gzip
    /// bytes directly or with JSON carrying per-file download URLs.
    pub fn download(&self) -> TaskResult<Vec<PathBuf>> {
        if !self.config_complete() {
            log::error!("UNL download skipped: incomplete configuration");
            return Ok(Vec::new());
        }
        let payload = json!({
            "fileNameList": self.file_names,
            "fileSvrId": self.file_svr_id,
            "rmtPubPath": self.rmt_pub_path,
        });
        log::info!(
            "requesting UNL archives from {} (files {:?}, server {})",
            self.url,
            self.file_names,
            self.file_svr_id
        );

        let client = reqwest::blocking::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        let response = match client.post(&self.url).json(&payload).send() {
            Ok(r) => r,
            Err(e) => {
                log::error!("UNL download request failed: {e}");
                return Ok(Vec::new());
            }
        };
        if response.status().as_u16() != 200 {
            log::error!("UNL download rejected with status {}", response.status());
            return Ok(Vec::new());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.bytes()?;

        if content_type.contains("application/gzip")
            || content_type.contains("application/x-gzip")
            || body.starts_with(&GZIP_MAGIC)
        {
            let path = self.save_archive(&body)?;
            return Ok(vec![path]);
        }

        // JSON answer: extract fileUrl/downloadUrl (string or array)
        // and fetch each one separately.
        let parsed: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                log::error!("UNL download response is neither gzip nor JSON: {e}");
                return Ok(Vec::new());
            }
        };
        let urls = response_file_urls(&parsed);
        if urls.is_empty() {
            log::error!("UNL download response carried no file URLs: {parsed}");
            return Ok(Vec::new());
        }
        let mut saved = Vec::new();
        for (idx, url) in urls.iter().enumerate() {
            match self.fetch_one(&client, url, idx) {
                Ok(Some(path)) => saved.push(path),
                Ok(None) => {}
                Err(e) => log::error!("fetching {url} failed: {e}"),
            }
        }
        Ok(saved)
    }

    fn fetch_one(
        &self,
        client: &reqwest::blocking::Client,
        url: &str,
        idx: usize,
    ) -> TaskResult<Option<PathBuf>> {
        let response = client.get(url).send()?;
        if response.status().as_u16() != 200 {
            log::error!("fetching {url} returned status {}", response.status());
            return Ok(None);
        }
        fs::create_dir_all(&self.temp_dir)?;
        let path = self.temp_dir.join(format!("downloaded_file_{idx}.unl.gz"));
        let mut file = File::create(&path)?;
        file.write_all(&response.bytes()?)?;
        log::info!("saved {url} to {}", path.display());
        Ok(Some(path))
    }

    fn save_archive(&self, body: &[u8]) -> TaskResult<PathBuf> {
        fs::create_dir_all(&self.temp_dir)?;
        let name = format!(
            "downloaded_{}_{}files_{}.unl.gz",
            self.file_svr_id,
            self.file_names.len(),
            std::process::id()
        );
        let path = self.temp_dir.join(name);
        let mut file = File::create(&path)?;
        file.write_all(body)?;
        log::info!("saved UNL archive to {}", path.display());
        Ok(path)
    }

    /// Deletes downloaded archives once the run is done with them.
    pub fn cleanup(&self, paths: &[PathBuf]) {
        for path in paths {
            match fs::remove_file(path) {
                Ok(()) => log::info!("removed temporary file {}", path.display()),
                Err(e) => log::warn!("could not remove {}: {e}", path.display()),
            }
        }
    }
}

fn response_file_urls(parsed: &Value) -> Vec<String> {
    let field = parsed.get("fileUrl").or_else(|| parsed.get("downloadUrl"));
    match field {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    #[test]
    fn gzipped_unl_rewrites_as_csv() {
        let dir = tempfile::TempDir::new().unwrap();
        let archive = dir.path().join("extract.unl.gz");
        let mut encoder = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
        encoder
            .write_all("alpha\x07beta\x07gamma\n\n  delta\x07epsilon  \n".as_bytes())
            .unwrap();
        encoder.finish().unwrap();

        let csv_path = unl_gz_to_csv(&archive).unwrap();
        assert_eq!(csv_path, dir.path().join("extract.csv"));

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&csv_path)
            .unwrap();
        let records: Vec<csv::StringRecord> =
            reader.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2, "blank lines are dropped");
        assert_eq!(&records[0], &["alpha", "beta", "gamma"][..]);
        assert_eq!(&records[1], &["delta", "epsilon"][..]);
    }

    #[test]
    fn archive_name_maps_to_csv_sibling() {
        assert_eq!(
            csv_sibling(Path::new("/tmp/extract.unl.gz")),
            PathBuf::from("/tmp/extract.csv")
        );
        assert_eq!(
            csv_sibling(Path::new("/tmp/extract.gz")),
            PathBuf::from("/tmp/extract.csv")
        );
    }

    #[test]
    fn file_urls_accept_string_or_array() {
        let single: Value = serde_json::from_str(r#"{"fileUrl": "http://a/x"}"#).unwrap();
        assert_eq!(response_file_urls(&single), vec!["http://a/x"]);

        let many: Value =
            serde_json::from_str(r#"{"downloadUrl": ["http://a/x", "http://a/y"]}"#).unwrap();
        assert_eq!(response_file_urls(&many), vec!["http://a/x", "http://a/y"]);

        let neither: Value = serde_json::from_str(r#"{"status": "ok"}"#).unwrap();
        assert!(response_file_urls(&neither).is_empty());
    }
}
