//! Shared primitive types used across the entire container.

/// Groups transaction rows belonging to one investigated case.
pub type CaseId = String;

/// Database key of a task configuration row.
pub type TaskId = i64;

/// Identifier handed out for one task execution (scheduled or manual).
pub type ExecutionId = String;
