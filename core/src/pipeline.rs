//! The aggregation pipeline — streaming read, chunked dedup, per-case
//! accumulation, aggregation, and canonical CSV output.
//!
//! RULE: dedup state is owned by one run. Every invocation starts
//! with a fresh seen-key set and drops it on every exit path; no state
//! leaks between runs.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;

use crate::aggregate::{self, CaseRiskProfile, OUTPUT_COLUMNS};
use crate::chunk::{self, ChunkStats, DedupSet, TransactionRow};
use crate::config::ContainerConfig;
use crate::error::{TaskError, TaskResult};
use crate::schema::{self, RawRow};
use crate::types::CaseId;

/// Input selector plus optional destination for one pipeline run.
/// Exactly one of `csv_file_path` / `csv_content` must be supplied.
#[derive(Debug, Default, Clone)]
pub struct ProcessRequest {
    pub csv_file_path: Option<PathBuf>,
    pub csv_content: Option<String>,
    pub output_path: Option<PathBuf>,
}

/// What one pipeline invocation reports back.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub success: bool,
    pub message: String,
    pub processed_count: usize,
    pub output_file: Option<PathBuf>,
}

/// Aggregate a transaction-level CSV into one risk profile per case.
///
/// File input takes precedence when both sources are supplied;
/// supplying neither is a usage error reported through the outcome.
/// Without an explicit output path the result lands in a timestamped
/// file under the configured temp dir.
pub fn process_csv(config: &ContainerConfig, request: &ProcessRequest) -> ProcessOutcome {
    let output_path = match &request.output_path {
        Some(path) => path.clone(),
        None => {
            let path = default_output_path(config);
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            path
        }
    };

    let result = if let Some(path) = &request.csv_file_path {
        log::info!("starting aggregation run from file: {}", path.display());
        File::open(path)
            .map_err(TaskError::from)
            .and_then(|file| run_reader(config, file, &output_path))
    } else if let Some(content) = &request.csv_content {
        log::info!(
            "starting aggregation run from inline content ({} bytes)",
            content.len()
        );
        run_reader(config, content.as_bytes(), &output_path)
    } else {
        return ProcessOutcome {
            success: false,
            message: "either csv_file_path or csv_content must be supplied".to_string(),
            processed_count: 0,
            output_file: None,
        };
    };

    match result {
        Ok(count) if count > 0 => ProcessOutcome {
            success: true,
            message: format!("aggregation complete: {count} cases processed"),
            processed_count: count,
            output_file: Some(output_path),
        },
        Ok(_) => {
            log::warn!("no cases were successfully aggregated");
            ProcessOutcome {
                success: false,
                message: "no cases were successfully aggregated; check the input data format"
                    .to_string(),
                processed_count: 0,
                output_file: None,
            }
        }
        Err(e) => {
            log::error!("aggregation run failed: {e}");
            ProcessOutcome {
                success: false,
                message: format!("aggregation failed: {e}"),
                processed_count: 0,
                output_file: None,
            }
        }
    }
}

/// Stream records chunk by chunk, accumulate per case, aggregate, and
/// write the output file. Returns the number of cases written; writes
/// nothing when no case survives.
fn run_reader<R: Read>(config: &ContainerConfig, reader: R, output: &Path) -> TaskResult<usize> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut seen = DedupSet::new();
    let mut cases: BTreeMap<CaseId, Vec<TransactionRow>> = BTreeMap::new();
    let mut chunk_buf: Vec<RawRow> = Vec::new();
    let mut totals = ChunkStats::default();
    let mut skipped_lines = 0usize;
    let mut width_checked = false;

    let mut records = csv_reader.byte_records();
    loop {
        chunk_buf.clear();
        let mut reached_end = false;
        while chunk_buf.len() < config.chunk_size {
            match records.next() {
                None => {
                    reached_end = true;
                    break;
                }
                Some(Ok(record)) => match raw_row_from_record(&record) {
                    Some(raw) => {
                        if !width_checked {
                            check_required_width(&raw)?;
                            width_checked = true;
                        }
                        chunk_buf.push(raw);
                    }
                    None => {
                        // Row-level bad encoding: skip the line, keep the run.
                        skipped_lines += 1;
                    }
                },
                Some(Err(e)) => match e.kind() {
                    csv::ErrorKind::Io(_) => return Err(e.into()),
                    _ => {
                        log::warn!("skipping malformed record: {e}");
                        skipped_lines += 1;
                    }
                },
            }
        }

        let (rows, stats) = chunk::process_chunk(&chunk_buf, &mut seen);
        totals.read += stats.read;
        totals.dropped_unidentified += stats.dropped_unidentified;
        totals.dropped_duplicate += stats.dropped_duplicate;
        for row in rows {
            cases.entry(row.case_id.clone()).or_default().push(row);
        }

        if reached_end {
            break;
        }
    }

    log::info!(
        "input consumed: {} rows read, {} unidentified dropped, {} duplicates dropped, {} malformed lines skipped, {} cases accumulated",
        totals.read,
        totals.dropped_unidentified,
        totals.dropped_duplicate,
        skipped_lines,
        cases.len()
    );

    let profiles = aggregate_cases(cases);
    if profiles.is_empty() {
        return Ok(0);
    }
    write_output(&profiles, output)?;
    log::info!(
        "aggregation finished: {} cases written to {}",
        profiles.len(),
        output.display()
    );
    Ok(profiles.len())
}

/// Run the case aggregator over every accumulated case. One case's
/// failure, error or panic, is logged and skipped; the rest proceed.
pub fn aggregate_cases(cases: BTreeMap<CaseId, Vec<TransactionRow>>) -> Vec<CaseRiskProfile> {
    let mut profiles = Vec::with_capacity(cases.len());
    for (case_id, rows) in cases {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            aggregate::aggregate_case(&case_id, &rows)
        }));
        match outcome {
            Ok(Ok(profile)) => profiles.push(profile),
            Ok(Err(e)) => log::error!("case '{case_id}' skipped: {e}"),
            Err(_) => log::error!("case '{case_id}' skipped: aggregation panicked"),
        }
    }
    profiles
}

/// Write profiles in canonical column order: UTF-8 with BOM, header
/// row, one record per case.
pub fn write_output(profiles: &[CaseRiskProfile], path: &Path) -> TaskResult<()> {
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all("\u{feff}".as_bytes())?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(OUTPUT_COLUMNS)?;
    for profile in profiles {
        writer.write_record(&profile.to_record()?)?;
    }
    writer.flush()?;
    Ok(())
}

/// Decode a record's cells, refusing rows with invalid UTF-8.
fn raw_row_from_record(record: &csv::ByteRecord) -> Option<RawRow> {
    let mut cells = Vec::with_capacity(record.len());
    for field in record.iter() {
        match std::str::from_utf8(field) {
            Ok(text) => cells.push(text.to_string()),
            Err(_) => return None,
        }
    }
    Some(RawRow::new(cells))
}

/// Run-level structural check: the first decodable record must be wide
/// enough to ever contain the required attributes.
fn check_required_width(first: &RawRow) -> TaskResult<()> {
    let required = schema::required_width();
    if first.width() < required {
        return Err(TaskError::MissingRequiredColumns {
            width: first.width(),
            required,
        });
    }
    Ok(())
}

fn default_output_path(config: &ContainerConfig) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    config.temp_dir.join(format!("processed_{stamp}.csv"))
}
