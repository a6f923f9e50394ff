use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use runwatch_core::{join_writers, GitHubClient, RecordingLogger};
use runwatch_monitor::{
    Cli, Config, FanoutSink, JsonlSink, Reconciler, Scheduler, SqliteStore, TracingSink,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version also land here, on stdout
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting runwatch {}", runwatch_monitor::get_version());

    let config = Config::from_cli(cli).context("Invalid configuration")?;

    let (recording_logger, recording_handle) = match &config.record_path {
        Some(path) => {
            info!("Recording enabled, logging to: {}", path.display());
            let (logger, handle) = RecordingLogger::spawn(path.clone());
            (Some(logger), Some(handle))
        }
        None => (None, None),
    };

    let client = GitHubClient::new_with_recording(
        config.token.clone(),
        &config.api_url,
        recording_logger,
    );

    info!("Using state database: {}", config.state_db.display());
    let store = SqliteStore::new(&config.state_db).context("Failed to open state database")?;

    let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
    let events_handle = match &config.events_file {
        Some(path) => {
            info!("Writing events to: {}", path.display());
            let (jsonl, handle) = JsonlSink::spawn(path.clone());
            sink = sink.with(Arc::new(jsonl));
            Some(handle)
        }
        None => None,
    };

    let reconciler = Arc::new(Reconciler::new(
        Arc::new(client),
        Arc::new(store),
        Arc::new(sink),
        config.repo.clone(),
    ));

    let state = reconciler
        .prepare(Utc::now())
        .await
        .context("Failed to prepare state database")?;

    let scheduler = Scheduler::spawn(reconciler.clone(), state, config.interval);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    let final_state = scheduler.stop().await.context("Polling task failed")?;
    if let Some(checkpoint) = final_state.checkpoint {
        info!("Final checkpoint: {}", checkpoint.to_rfc3339());
    }

    // Writers flush once every sender is gone
    drop(reconciler);
    let failed = join_writers([events_handle, recording_handle].into_iter().flatten()).await;
    if failed > 0 {
        error!("{} writer task(s) failed; output files may be incomplete", failed);
    }

    Ok(())
}
