//! Incremental reconciliation of remote workflow activity against the store.
//!
//! One poll cycle reads the checkpoint, fetches the repository's runs, and for
//! every run updated strictly after the checkpoint diffs the run, its jobs and
//! their steps against what the store already knows. Each transition
//! (`UNKNOWN -> OBSERVED -> COMPLETED`, per entity) is reported exactly once
//! and then recorded. The checkpoint advances to the newest `updated_at` seen,
//! but only when the cycle reported at least one transition and completed
//! without error.
//!
//! A notification is sent before the matching store write. If a cycle aborts
//! between the two, the next cycle sees the entity as unrecorded and reports
//! it again: delivery to the sink is at-least-once, never lost.
//!
//! The engine keeps no state between cycles besides the [`PollState`] value
//! the caller threads through [`Reconciler::run_cycle`].

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use runwatch_core::{ActivitySource, Job, RepoSlug, SourceError, WorkflowRun};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::event::{Notification, TransitionEvent};
use crate::sink::EventSink;
use crate::store::{StateStore, StoreError};

/// Engine state carried from one cycle to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollState {
    /// When this process started. Fallback checkpoint if none is persisted.
    pub startup_time: DateTime<Utc>,
    /// No checkpoint existed when this process started.
    pub first_start: bool,
    /// At least one cycle has run to completion (successfully) in this process.
    pub has_polled_before: bool,
    /// Checkpoint as of the end of the last successful cycle.
    pub checkpoint: Option<DateTime<Utc>>,
}

impl PollState {
    pub fn new(startup_time: DateTime<Utc>) -> Self {
        Self {
            startup_time,
            first_start: false,
            has_polled_before: false,
            checkpoint: None,
        }
    }

    fn is_first_poll(&self) -> bool {
        self.first_start && !self.has_polled_before
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The provider returned no runs.
    NoActivity,
    /// No run was updated after the checkpoint.
    NothingNew,
    /// Runs passed the checkpoint filter but produced no transitions; the
    /// checkpoint is left where it was.
    Reobserved,
    /// Transitions were reported and the checkpoint advanced.
    Advanced,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub correlation_id: String,
    pub outcome: CycleOutcome,
    pub events: Vec<TransitionEvent>,
    /// Number of runs updated strictly after the checkpoint.
    pub runs_considered: usize,
    /// Checkpoint in effect after the cycle.
    pub checkpoint: DateTime<Utc>,
}

/// Failure that aborted a poll cycle. The checkpoint is never advanced by a
/// failed cycle; writes already made stand and are replay-safe.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("transport failure: {0}")]
    Transport(#[from] SourceError),

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

/// Transitions reported so far in the current cycle.
struct Emitter<'a> {
    sink: &'a dyn EventSink,
    events: Vec<TransitionEvent>,
}

impl Emitter<'_> {
    fn emit(&mut self, event: TransitionEvent) {
        self.sink.notify(&Notification::Transition(event.clone()));
        self.events.push(event);
    }
}

pub struct Reconciler {
    source: Arc<dyn ActivitySource>,
    store: Arc<dyn StateStore>,
    sink: Arc<dyn EventSink>,
    repo: RepoSlug,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn ActivitySource>,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn EventSink>,
        repo: RepoSlug,
    ) -> Self {
        Self {
            source,
            store,
            sink,
            repo,
        }
    }

    pub fn repo(&self) -> &RepoSlug {
        &self.repo
    }

    /// Prepare the store and derive the initial poll state.
    ///
    /// On a first start (no checkpoint persisted) the startup time becomes the
    /// checkpoint, so history that predates this process is never reported.
    pub async fn prepare(&self, startup_time: DateTime<Utc>) -> Result<PollState, StoreError> {
        self.store.initialize_schema().await?;

        let mut state = PollState::new(startup_time);

        match self.store.get_checkpoint().await? {
            Some(checkpoint) => {
                info!("Last checkpoint: {}", fmt_instant(&checkpoint));
                state.checkpoint = Some(checkpoint);
            }
            None => {
                let checkpoint = self.store.set_checkpoint(startup_time).await?;
                info!(
                    "Starting checking from: {}. Previous workflow runs are ignored.",
                    fmt_instant(&checkpoint)
                );
                state.first_start = true;
                state.checkpoint = Some(checkpoint);
            }
        }

        Ok(state)
    }

    /// Run one poll cycle.
    ///
    /// Returns the state for the next cycle along with a report. On error the
    /// caller keeps the state it passed in.
    pub async fn run_cycle(
        &self,
        state: &PollState,
    ) -> Result<(PollState, CycleReport), CycleError> {
        let correlation_id = Uuid::new_v4().to_string();
        let span = info_span!("poll_cycle", correlation_id = %correlation_id, repo = %self.repo);

        async {
            info!("Polling GitHub workflows...");
            let report = self.reconcile(state, &correlation_id).await?;

            let next = PollState {
                has_polled_before: true,
                checkpoint: Some(report.checkpoint),
                ..state.clone()
            };
            Ok((next, report))
        }
        .instrument(span)
        .await
    }

    async fn reconcile(
        &self,
        state: &PollState,
        correlation_id: &str,
    ) -> Result<CycleReport, CycleError> {
        let checkpoint = self
            .store
            .get_checkpoint()
            .await?
            .unwrap_or(state.startup_time);

        let runs = self
            .source
            .list_runs(Some(correlation_id), &self.repo)
            .await?;

        let mut report = CycleReport {
            correlation_id: correlation_id.to_string(),
            outcome: CycleOutcome::NoActivity,
            events: Vec::new(),
            runs_considered: 0,
            checkpoint,
        };

        if runs.is_empty() {
            self.sink.notify(&Notification::NoActivity);
            return Ok(report);
        }

        let mut emitter = Emitter {
            sink: self.sink.as_ref(),
            events: Vec::new(),
        };
        let mut max_seen = checkpoint;

        for run in &runs {
            // Runs not updated after the checkpoint were fully processed by an
            // earlier cycle (or predate the first start).
            let Some(updated_at) = run.updated_at.filter(|u| *u > checkpoint) else {
                continue;
            };

            report.runs_considered += 1;
            max_seen = max_seen.max(updated_at);

            self.reconcile_run(run, correlation_id, &mut emitter).await?;
        }

        report.events = emitter.events;

        if report.runs_considered == 0 {
            report.outcome = CycleOutcome::NothingNew;
            self.sink.notify(&if state.is_first_poll() {
                Notification::WaitingForFirstRun
            } else {
                Notification::NothingSinceLastPoll
            });
            return Ok(report);
        }

        if report.events.is_empty() {
            // Nothing was recorded, so the checkpoint stays put and these runs
            // are scanned again next cycle.
            report.outcome = CycleOutcome::Reobserved;
            if !state.is_first_poll() {
                self.sink.notify(&Notification::NoNewTransitions);
            }
            debug!(
                "{} run(s) after checkpoint produced no transitions",
                report.runs_considered
            );
            return Ok(report);
        }

        report.checkpoint = self.store.set_checkpoint(max_seen).await?;
        report.outcome = CycleOutcome::Advanced;
        info!(
            "Recorded {} transition(s); checkpoint now {}",
            report.events.len(),
            fmt_instant(&report.checkpoint)
        );

        Ok(report)
    }

    async fn reconcile_run(
        &self,
        run: &WorkflowRun,
        correlation_id: &str,
        emitter: &mut Emitter<'_>,
    ) -> Result<(), CycleError> {
        match self.store.get_run(run.id).await? {
            None => {
                emitter.emit(TransitionEvent::run_observed(run));
                self.store.insert_run_if_absent(run).await?;
            }
            Some(stored) if run.differs_from(&stored) => {
                emitter.emit(TransitionEvent::run_changed(run));
                self.store.update_run_status(run).await?;
            }
            Some(_) => {}
        }

        let jobs = self
            .source
            .list_jobs(Some(correlation_id), &self.repo, run.id)
            .await?;

        for job in &jobs {
            self.reconcile_job(run, job, emitter).await?;
        }

        Ok(())
    }

    /// Started and completed are independent checks: a job first seen after
    /// it finished reports both in the same pass.
    async fn reconcile_job(
        &self,
        run: &WorkflowRun,
        job: &Job,
        emitter: &mut Emitter<'_>,
    ) -> Result<(), CycleError> {
        if !self.store.job_exists(job.id).await? {
            emitter.emit(TransitionEvent::job_started(run, job));
            self.store.insert_job_if_absent(job, run.id).await?;
        }

        if job.is_concluded() && !self.store.is_job_completion_recorded(job.id).await? {
            emitter.emit(TransitionEvent::job_completed(run, job));
            self.store.mark_job_completion_recorded(job.id).await?;
        }

        for step in &job.steps {
            if !self.store.step_exists(job.id, &step.name).await? {
                emitter.emit(TransitionEvent::step_started(run, job, step));
                self.store.insert_step_if_absent(step, job.id).await?;
            }

            if step.is_concluded()
                && !self
                    .store
                    .is_step_completion_recorded(job.id, &step.name)
                    .await?
            {
                emitter.emit(TransitionEvent::step_completed(run, job, step));
                self.store
                    .mark_step_completion_recorded(job.id, &step.name)
                    .await?;
            }
        }

        Ok(())
    }
}

fn fmt_instant(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
