//! Durable state for the reconciliation engine.
//!
//! The store persists what has already been observed (runs, jobs, steps) and
//! the checkpoint. It performs idempotent writes and point lookups only; all
//! diffing lives in [`crate::reconciliation`].
//!
//! Inserts are "insert if absent": the first observation of an identity wins,
//! and later observations only change stored state through the explicit
//! update paths (`update_run_status`, the completion markers). Replaying a
//! poll cycle is therefore harmless.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runwatch_core::{Job, Step, WorkflowRun};

/// Persistence failure. Aborts the current poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("corrupt {what} in state database")]
    Corruption { what: String },
}

impl StoreError {
    pub fn storage(operation: &'static str, message: impl ToString) -> Self {
        StoreError::Storage {
            operation,
            message: message.to_string(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        StoreError::Corruption { what: what.into() }
    }
}

/// Storage backend for observed workflow activity.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create the relations if absent. Non-destructive; safe on every startup.
    async fn initialize_schema(&self) -> Result<(), StoreError>;

    /// The persisted checkpoint, or `None` before the first write.
    async fn get_checkpoint(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Persist a new checkpoint and return the effective stored value.
    ///
    /// The checkpoint never moves backwards: a value older than the stored
    /// one is ignored and the stored value is returned.
    async fn set_checkpoint(&self, at: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError>;

    async fn get_run(&self, id: u64) -> Result<Option<WorkflowRun>, StoreError>;

    /// Insert a run unless one with the same id exists. Returns whether a
    /// row was written.
    async fn insert_run_if_absent(&self, run: &WorkflowRun) -> Result<bool, StoreError>;

    /// Overwrite status, conclusion and `updated_at` of an existing run.
    async fn update_run_status(&self, run: &WorkflowRun) -> Result<(), StoreError>;

    async fn job_exists(&self, job_id: u64) -> Result<bool, StoreError>;

    async fn insert_job_if_absent(&self, job: &Job, run_id: u64) -> Result<bool, StoreError>;

    /// Whether the job's completion has been recorded. `false` for unknown jobs.
    async fn is_job_completion_recorded(&self, job_id: u64) -> Result<bool, StoreError>;

    async fn mark_job_completion_recorded(&self, job_id: u64) -> Result<(), StoreError>;

    async fn step_exists(&self, job_id: u64, name: &str) -> Result<bool, StoreError>;

    async fn insert_step_if_absent(&self, step: &Step, job_id: u64) -> Result<bool, StoreError>;

    /// Whether the step's completion has been recorded. `false` for unknown steps.
    async fn is_step_completion_recorded(&self, job_id: u64, name: &str)
        -> Result<bool, StoreError>;

    async fn mark_step_completion_recorded(&self, job_id: u64, name: &str)
        -> Result<(), StoreError>;
}
