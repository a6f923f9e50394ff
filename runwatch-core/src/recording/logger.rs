use super::types::RecordedEvent;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Writer for GitHub API interaction recordings.
pub type RecordingLogger = JsonlWriter<RecordedEvent>;

/// Append-only JSON-lines writer.
///
/// Items are handed to a background task over an unbounded channel, so
/// `append` never blocks the caller. The task exits once every clone of the
/// writer has been dropped and the channel is drained.
pub struct JsonlWriter<T> {
    sender: mpsc::UnboundedSender<T>,
}

impl<T> Clone for JsonlWriter<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> JsonlWriter<T>
where
    T: Serialize + Send + 'static,
{
    /// Spawn the writer task. Must be called from within a tokio runtime.
    ///
    /// The returned handle resolves after the last writer is dropped and all
    /// queued lines have been flushed.
    pub fn spawn(log_file_path: PathBuf) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            if let Err(e) = Self::writer_task(log_file_path, &mut receiver).await {
                error!("JSON-lines writer failed: {}", e);
            }
        });

        (Self { sender }, handle)
    }

    pub fn append(&self, item: T) {
        if self.sender.send(item).is_err() {
            error!("Failed to queue line for JSON-lines writer: receiver dropped");
        }
    }

    async fn writer_task(
        log_file_path: PathBuf,
        receiver: &mut mpsc::UnboundedReceiver<T>,
    ) -> io::Result<()> {
        if let Some(parent) = log_file_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file_path)
            .await?;

        info!("Appending JSON lines to: {:?}", log_file_path);

        while let Some(item) = receiver.recv().await {
            match serde_json::to_string(&item) {
                Ok(json_line) => {
                    if let Err(e) = file.write_all(format!("{}\n", json_line).as_bytes()).await {
                        error!("Failed to write line to {:?}: {}", log_file_path, e);
                        continue;
                    }
                    if let Err(e) = file.flush().await {
                        error!("Failed to flush {:?}: {}", log_file_path, e);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize line: {}", e);
                }
            }
        }

        Ok(())
    }
}

/// Wait for writer tasks to drain. Every writer handle must already be
/// dropped. Returns how many tasks ended abnormally; each is logged.
pub async fn join_writers<I>(handles: I) -> usize
where
    I: IntoIterator<Item = JoinHandle<()>>,
{
    let mut failed = 0;
    for handle in handles {
        if let Err(e) = handle.await {
            error!("JSON-lines writer task failed: {}", e);
            failed += 1;
        }
    }
    failed
}
