//! Interval schedules and the bounded worker pool.
//!
//! The "when" primitive is deliberately minimal: a [`Schedule`] yields
//! the next fire instant and nothing else. Dispatch, concurrency
//! bounds, and per-execution sessions live in the container.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use crate::error::{TaskError, TaskResult};

/// A fixed repeat interval parsed from a humantime expression
/// ("30m", "1h 30m", "45s").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    interval: StdDuration,
}

impl Schedule {
    pub fn parse(expr: &str) -> TaskResult<Self> {
        let interval =
            humantime::parse_duration(expr.trim()).map_err(|e| TaskError::InvalidSchedule {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
        if interval.is_zero() {
            return Err(TaskError::InvalidSchedule {
                expr: expr.to_string(),
                reason: "interval must be positive".to_string(),
            });
        }
        Ok(Self { interval })
    }

    pub fn interval(&self) -> StdDuration {
        self.interval
    }

    /// Next fire instant strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let step = Duration::from_std(self.interval).unwrap_or_else(|_| Duration::days(1));
        after + step
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool: at most `size` submitted jobs run concurrently.
/// Workers share one receiver and pull jobs as they free up.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> TaskResult<Self> {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("task-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, receiver))?;
            workers.push(handle);
        }
        log::info!("worker pool started with {size} workers");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queue a job for the next free worker.
    pub fn submit(&self, job: Job) -> TaskResult<()> {
        match &self.sender {
            Some(sender) => sender
                .send(job)
                .map_err(|_| anyhow::anyhow!("worker pool is shut down").into()),
            None => Err(anyhow::anyhow!("worker pool is shut down").into()),
        }
    }

    /// Close the queue, drain outstanding jobs, and join every worker.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(worker_id: usize, receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let guard = receiver.lock().unwrap_or_else(|e| e.into_inner());
            guard.recv()
        };
        match job {
            Ok(job) => {
                log::debug!("worker {worker_id} picked up a job");
                job();
            }
            // Channel closed: shutdown.
            Err(_) => break,
        }
    }
}
