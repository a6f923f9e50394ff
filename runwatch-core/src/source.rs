//! The query surface the monitor polls.

use async_trait::async_trait;

use crate::model::{Job, RepoSlug, WorkflowRun};

/// Failure talking to the CI provider.
///
/// Any of these aborts the current poll cycle; the next scheduled cycle
/// retries from scratch.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("GitHub API error {operation}: {status} - {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("request failed while {operation}: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("failed to decode response while {operation}: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },
}

/// Read-only view of a repository's workflow activity.
///
/// Implementations hold no memory of prior calls. `correlation_id` tags the
/// outgoing requests with the poll cycle that issued them.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Current workflow runs of the repository, in provider order.
    async fn list_runs(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoSlug,
    ) -> Result<Vec<WorkflowRun>, SourceError>;

    /// Jobs of a run, each carrying its steps.
    async fn list_jobs(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoSlug,
        run_id: u64,
    ) -> Result<Vec<Job>, SourceError>;
}
