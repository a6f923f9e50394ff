//! In-memory implementation of `StateStore`.
//!
//! Same semantics as [`SqliteStore`](super::SqliteStore), but all state is
//! lost on restart. Used by tests and for dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runwatch_core::{Job, Step, WorkflowRun};
use tokio::sync::RwLock;
use tracing::warn;

use super::{StateStore, StoreError};

#[derive(Debug, Clone)]
struct StoredJob {
    run_id: u64,
    completion_recorded: bool,
}

#[derive(Default)]
struct Inner {
    checkpoint: Option<DateTime<Utc>>,
    runs: HashMap<u64, WorkflowRun>,
    jobs: HashMap<u64, StoredJob>,
    /// (job id, step name) -> completion recorded
    steps: HashMap<(u64, String), bool>,
}

/// In-memory state store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run id a stored job belongs to.
    #[cfg(test)]
    pub(crate) async fn job_run_id(&self, job_id: u64) -> Option<u64> {
        self.inner.read().await.jobs.get(&job_id).map(|j| j.run_id)
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn initialize_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_checkpoint(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.inner.read().await.checkpoint)
    }

    async fn set_checkpoint(&self, at: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.checkpoint {
            Some(existing) if existing > at => {
                warn!(
                    "Ignoring checkpoint {} older than stored checkpoint {}",
                    at, existing
                );
                Ok(existing)
            }
            _ => {
                inner.checkpoint = Some(at);
                Ok(at)
            }
        }
    }

    async fn get_run(&self, id: u64) -> Result<Option<WorkflowRun>, StoreError> {
        Ok(self.inner.read().await.runs.get(&id).cloned())
    }

    async fn insert_run_if_absent(&self, run: &WorkflowRun) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.runs.contains_key(&run.id) {
            return Ok(false);
        }
        inner.runs.insert(run.id, run.clone());
        Ok(true)
    }

    async fn update_run_status(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner.runs.get_mut(&run.id).ok_or_else(|| {
            StoreError::storage("update_run_status", format!("run {} not found", run.id))
        })?;
        stored.status = run.status.clone();
        stored.conclusion = run.conclusion.clone();
        stored.updated_at = run.updated_at;
        Ok(())
    }

    async fn job_exists(&self, job_id: u64) -> Result<bool, StoreError> {
        Ok(self.inner.read().await.jobs.contains_key(&job_id))
    }

    async fn insert_job_if_absent(&self, job: &Job, run_id: u64) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Ok(false);
        }
        inner.jobs.insert(
            job.id,
            StoredJob {
                run_id,
                completion_recorded: false,
            },
        );
        Ok(true)
    }

    async fn is_job_completion_recorded(&self, job_id: u64) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .jobs
            .get(&job_id)
            .is_some_and(|j| j.completion_recorded))
    }

    async fn mark_job_completion_recorded(&self, job_id: u64) -> Result<(), StoreError> {
        if let Some(job) = self.inner.write().await.jobs.get_mut(&job_id) {
            job.completion_recorded = true;
        }
        Ok(())
    }

    async fn step_exists(&self, job_id: u64, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .steps
            .contains_key(&(job_id, name.to_string())))
    }

    async fn insert_step_if_absent(&self, step: &Step, job_id: u64) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let key = (job_id, step.name.clone());
        if inner.steps.contains_key(&key) {
            return Ok(false);
        }
        inner.steps.insert(key, false);
        Ok(true)
    }

    async fn is_step_completion_recorded(
        &self,
        job_id: u64,
        name: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .steps
            .get(&(job_id, name.to_string()))
            .copied()
            .unwrap_or(false))
    }

    async fn mark_step_completion_recorded(
        &self,
        job_id: u64,
        name: &str,
    ) -> Result<(), StoreError> {
        if let Some(recorded) = self
            .inner
            .write()
            .await
            .steps
            .get_mut(&(job_id, name.to_string()))
        {
            *recorded = true;
        }
        Ok(())
    }
}
