//! Destinations for cycle notifications.
//!
//! A sink is an append-only channel; delivery failures are the sink's own
//! concern and never abort a poll cycle.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use runwatch_core::JsonlWriter;
use tokio::task::JoinHandle;
use tracing::info;

use crate::event::{Notification, TransitionEvent};

pub trait EventSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Logs every notification as one line on the `runwatch::events` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify(&self, notification: &Notification) {
        info!(target: "runwatch::events", "{}", notification);
    }
}

/// Appends transition events to a JSON-lines file. Other notifications are
/// not written.
#[derive(Clone)]
pub struct JsonlSink {
    writer: JsonlWriter<TransitionEvent>,
}

impl JsonlSink {
    /// Must be called from within a tokio runtime. The handle resolves once
    /// every clone of the sink is dropped and pending lines are flushed.
    pub fn spawn(path: PathBuf) -> (Self, JoinHandle<()>) {
        let (writer, handle) = JsonlWriter::spawn(path);
        (Self { writer }, handle)
    }
}

impl EventSink for JsonlSink {
    fn notify(&self, notification: &Notification) {
        if let Notification::Transition(event) = notification {
            self.writer.append(event.clone());
        }
    }
}

/// Forwards each notification to every inner sink, in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn notify(&self, notification: &Notification) {
        for sink in &self.sinks {
            sink.notify(notification);
        }
    }
}

/// Collects notifications in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    notifications: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    pub fn transitions(&self) -> Vec<TransitionEvent> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Transition(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut n) = self.notifications.lock() {
            n.clear();
        }
    }
}

impl EventSink for MemorySink {
    fn notify(&self, notification: &Notification) {
        if let Ok(mut n) = self.notifications.lock() {
            n.push(notification.clone());
        }
    }
}
