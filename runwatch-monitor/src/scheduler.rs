use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::reconciliation::{PollState, Reconciler};

/// Drives [`Reconciler::run_cycle`] on a fixed interval.
pub struct Scheduler;

impl Scheduler {
    /// Start polling. The first cycle runs immediately. Cycles never overlap:
    /// a tick that comes due while a cycle is still running is skipped.
    pub fn spawn(
        reconciler: Arc<Reconciler>,
        state: PollState,
        period: Duration,
    ) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(polling_loop(reconciler, state, period, stop_rx));
        SchedulerHandle { stop_tx, task }
    }
}

pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<PollState>,
}

impl SchedulerHandle {
    /// Let any in-flight cycle finish, then stop. Returns the state after the
    /// last successful cycle.
    pub async fn stop(self) -> Result<PollState, JoinError> {
        // Err only if the loop already exited
        let _ = self.stop_tx.send(true);
        self.task.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn polling_loop(
    reconciler: Arc<Reconciler>,
    mut state: PollState,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> PollState {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Polling {} every {}s",
        reconciler.repo(),
        period.as_secs_f64()
    );

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        match reconciler.run_cycle(&state).await {
            Ok((next, report)) => {
                debug!(
                    "Cycle {} finished: {:?}, {} transition(s)",
                    report.correlation_id,
                    report.outcome,
                    report.events.len()
                );
                state = next;
            }
            Err(e) => {
                error!("Error polling workflow runs: {}", e);
            }
        }

        if *stop_rx.borrow() {
            break;
        }
    }

    info!("Polling stopped");
    state
}
