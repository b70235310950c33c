use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid schedule '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error("Task {0} not found")]
    TaskNotFound(i64),

    #[error("Task '{0}' not found")]
    TaskNameNotFound(String),

    #[error("Task '{0}' is disabled")]
    TaskDisabled(String),

    #[error("Input too narrow for required columns: first record has {width} fields, need at least {required}")]
    MissingRequiredColumns { width: usize, required: usize },

    #[error("Aggregation of case '{case_id}' failed: {reason}")]
    CaseAggregation { case_id: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type TaskResult<T> = Result<T, TaskError>;
