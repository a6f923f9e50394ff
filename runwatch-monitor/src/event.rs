//! Transition events and the notifications a poll cycle produces.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use runwatch_core::{Job, Step, WorkflowRun};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    RunObserved,
    RunChanged,
    JobStarted,
    JobCompleted,
    StepStarted,
    StepCompleted,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::RunObserved => "RUN_OBSERVED",
            TransitionKind::RunChanged => "RUN_CHANGED",
            TransitionKind::JobStarted => "JOB_STARTED",
            TransitionKind::JobCompleted => "JOB_COMPLETED",
            TransitionKind::StepStarted => "STEP_STARTED",
            TransitionKind::StepCompleted => "STEP_COMPLETED",
        }
    }

    fn is_completion(&self) -> bool {
        matches!(
            self,
            TransitionKind::JobCompleted | TransitionKind::StepCompleted
        )
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed state transition of a run, job or step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub kind: TransitionKind,
    pub time: Option<DateTime<Utc>>,
    pub run_id: u64,
    pub run_name: Option<String>,
    pub branch: Option<String>,
    pub sha: Option<String>,
    pub status: Option<String>,
    pub job_id: Option<u64>,
    pub job_name: Option<String>,
    pub step_name: Option<String>,
    pub conclusion: Option<String>,
}

impl TransitionEvent {
    fn for_run(kind: TransitionKind, run: &WorkflowRun) -> Self {
        Self {
            kind,
            time: run.updated_at,
            run_id: run.id,
            run_name: run.name.clone(),
            branch: run.head_branch.clone(),
            sha: run.head_sha.clone(),
            status: run.status.clone(),
            job_id: None,
            job_name: None,
            step_name: None,
            conclusion: run.conclusion.clone(),
        }
    }

    pub fn run_observed(run: &WorkflowRun) -> Self {
        Self::for_run(TransitionKind::RunObserved, run)
    }

    pub fn run_changed(run: &WorkflowRun) -> Self {
        Self::for_run(TransitionKind::RunChanged, run)
    }

    fn for_job(kind: TransitionKind, run: &WorkflowRun, job: &Job) -> Self {
        let (time, conclusion) = if kind.is_completion() {
            (job.completed_at, job.conclusion.clone())
        } else {
            (job.started_at, None)
        };

        Self {
            kind,
            time,
            run_id: run.id,
            run_name: run.name.clone(),
            branch: run.head_branch.clone(),
            sha: run.head_sha.clone(),
            status: job.status.clone(),
            job_id: Some(job.id),
            job_name: job.name.clone(),
            step_name: None,
            conclusion,
        }
    }

    pub fn job_started(run: &WorkflowRun, job: &Job) -> Self {
        Self::for_job(TransitionKind::JobStarted, run, job)
    }

    pub fn job_completed(run: &WorkflowRun, job: &Job) -> Self {
        Self::for_job(TransitionKind::JobCompleted, run, job)
    }

    fn for_step(kind: TransitionKind, run: &WorkflowRun, job: &Job, step: &Step) -> Self {
        let (time, conclusion) = if kind.is_completion() {
            (step.completed_at, step.conclusion.clone())
        } else {
            (step.started_at, None)
        };

        Self {
            kind,
            time,
            run_id: run.id,
            run_name: run.name.clone(),
            branch: run.head_branch.clone(),
            sha: run.head_sha.clone(),
            status: step.status.clone(),
            job_id: Some(job.id),
            job_name: job.name.clone(),
            step_name: Some(step.name.clone()),
            conclusion,
        }
    }

    pub fn step_started(run: &WorkflowRun, job: &Job, step: &Step) -> Self {
        Self::for_step(TransitionKind::StepStarted, run, job, step)
    }

    pub fn step_completed(run: &WorkflowRun, job: &Job, step: &Step) -> Self {
        Self::for_step(TransitionKind::StepCompleted, run, job, step)
    }
}

fn or_na(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("N/A")
}

impl fmt::Display for TransitionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self
            .time
            .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            .unwrap_or_else(|| "N/A".to_string());

        write!(f, "Time={} Event={} Run={}", time, self.kind, self.run_id)?;

        match (self.job_id, &self.step_name) {
            (None, _) => write!(
                f,
                " Name=\"{}\" Status={}",
                or_na(&self.run_name),
                or_na(&self.status)
            )?,
            (Some(job_id), None) => {
                write!(f, " Job={} Name=\"{}\"", job_id, or_na(&self.job_name))?
            }
            (Some(job_id), Some(step)) => write!(
                f,
                " Job={} Name=\"{}\" Step=\"{}\"",
                job_id,
                or_na(&self.job_name),
                step
            )?,
        }

        write!(f, " Branch={} Sha={}", or_na(&self.branch), or_na(&self.sha))?;

        if let Some(conclusion) = &self.conclusion {
            write!(f, " Conclusion={}", conclusion)?;
        }

        Ok(())
    }
}

/// Everything a poll cycle reports to the event sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Transition(TransitionEvent),
    /// The provider returned no workflow runs at all.
    NoActivity,
    /// First poll after a fresh start: only runs predating startup exist.
    WaitingForFirstRun,
    /// No run was updated after the checkpoint.
    NothingSinceLastPoll,
    /// Runs were updated after the checkpoint but nothing new was recorded.
    NoNewTransitions,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Transition(event) => event.fmt(f),
            Notification::NoActivity => f.write_str("No workflow runs found"),
            Notification::WaitingForFirstRun => f.write_str("Waiting for new action start..."),
            Notification::NothingSinceLastPoll => {
                f.write_str("No workflow runs found since last polling")
            }
            Notification::NoNewTransitions => {
                f.write_str("No new workflow runs found since last polling")
            }
        }
    }
}
