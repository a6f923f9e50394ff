pub mod config;
pub mod event;
pub mod reconciliation;
pub mod scheduler;
pub mod sink;
pub mod store;

pub use config::{Cli, Config};
pub use event::{Notification, TransitionEvent, TransitionKind};
pub use reconciliation::{CycleError, CycleOutcome, CycleReport, PollState, Reconciler};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use sink::{EventSink, FanoutSink, JsonlSink, MemorySink, TracingSink};
pub use store::{InMemoryStore, SqliteStore, StateStore, StoreError};

// Build-time information
mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Package version plus the short git hash of the build, when known.
pub fn get_version() -> String {
    let hash = option_env!("RUNWATCH_GIT_HASH").or(built_info::GIT_COMMIT_HASH);

    match hash {
        Some(hash) => {
            let short = hash.get(..8).unwrap_or(hash);
            format!("{} ({})", built_info::PKG_VERSION, short)
        }
        None => built_info::PKG_VERSION.to_string(),
    }
}
