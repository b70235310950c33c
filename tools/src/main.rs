//! task-runner: headless task container for the case-aggregation
//! service.
//!
//! Usage:
//!   task-runner                                   run the container
//!   task-runner --run-for 2h                      run, then stop
//!   task-runner --aggregate in.csv [--out out.csv]
//!   task-runner --convert extract.unl.gz
//!   task-runner --trigger <task-name>             run one task now
//!   task-runner --seed-sample                     insert demo tasks

use std::env;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use caseflow_core::archive::unl_gz_to_csv;
use caseflow_core::config::ContainerConfig;
use caseflow_core::container::TaskContainer;
use caseflow_core::pipeline::{process_csv, ProcessRequest};
use caseflow_core::status::ExecutionState;
use caseflow_core::store::TaskStore;

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config = ContainerConfig::from_env();

    const KNOWN_FLAGS: [&str; 6] = [
        "--aggregate",
        "--out",
        "--convert",
        "--trigger",
        "--seed-sample",
        "--run-for",
    ];
    for arg in args.iter().skip(1).filter(|a| a.starts_with("--")) {
        if !KNOWN_FLAGS.contains(&arg.as_str()) {
            log::warn!("unknown flag: {arg}");
        }
    }

    if let Some(input) = flag_value(&args, "--aggregate") {
        let out = flag_value(&args, "--out");
        return run_aggregate(&config, &input, out);
    }
    if let Some(archive) = flag_value(&args, "--convert") {
        let csv_path = unl_gz_to_csv(Path::new(&archive))?;
        println!("{}", csv_path.display());
        return Ok(());
    }
    if let Some(task_name) = flag_value(&args, "--trigger") {
        return run_trigger(config, &task_name);
    }
    if args.iter().any(|a| a == "--seed-sample") {
        return seed_sample(&config);
    }
    run_container(config, flag_value(&args, "--run-for"))
}

fn run_container(config: ContainerConfig, run_for: Option<String>) -> Result<()> {
    println!("task-runner");
    println!("  db:         {}", config.db_path);
    println!("  chunk size: {}", config.chunk_size);
    println!("  workers:    {}", config.worker_concurrency);
    println!("  temp dir:   {}", config.temp_dir.display());
    println!();

    let mut container = TaskContainer::new(config)?;
    let scheduled = container.reload_tasks()?;
    println!("  scheduled:  {scheduled} tasks");
    container.start()?;

    match run_for {
        Some(expr) => {
            let window = humantime::parse_duration(expr.trim())?;
            thread::sleep(window);
            container.stop();
            Ok(())
        }
        None => loop {
            thread::sleep(Duration::from_secs(3600));
        },
    }
}

fn run_aggregate(config: &ContainerConfig, input: &str, out: Option<String>) -> Result<()> {
    let request = ProcessRequest {
        csv_file_path: Some(PathBuf::from(input)),
        csv_content: None,
        output_path: out.map(PathBuf::from),
    };
    let outcome = process_csv(config, &request);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}

fn run_trigger(config: ContainerConfig, task_name: &str) -> Result<()> {
    let container = TaskContainer::new(config)?;
    let execution_id = container.trigger_task_by_name(task_name)?;
    println!("execution {execution_id} started");
    loop {
        thread::sleep(Duration::from_millis(500));
        let Some(status) = container.execution_status(&execution_id) else {
            anyhow::bail!("execution {execution_id} is missing from the status table");
        };
        if matches!(
            status.state,
            ExecutionState::Completed | ExecutionState::Failed
        ) {
            println!("{}", serde_json::to_string_pretty(&status)?);
            if status.state == ExecutionState::Failed {
                std::process::exit(1);
            }
            return Ok(());
        }
    }
}

/// Demo seed: a scheduled aggregation task and a manual-only batch
/// re-post task pointed at the same profiles directory.
fn seed_sample(config: &ContainerConfig) -> Result<()> {
    let store = TaskStore::open(&config.db_path)?;
    store.migrate()?;
    let profiles_dir = config.temp_dir.join("profiles");

    let aggregation = serde_json::json!({
        "type": "aggregation",
        "output_dir": profiles_dir.to_string_lossy(),
    });
    let id = store.insert_task("daily-aggregation", Some("24h"), &aggregation, true)?;
    println!("inserted task {id}: daily-aggregation (every 24h)");

    let batch = serde_json::json!({
        "type": "batch_api_call",
        "api_endpoint": "http://localhost/v1",
        "csv_file_path": profiles_dir.to_string_lossy(),
        "API-KEY": "replace-me",
    });
    let id = store.insert_task("workflow-repost", None, &batch, true)?;
    println!("inserted task {id}: workflow-repost (manual trigger)");
    Ok(())
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
}
