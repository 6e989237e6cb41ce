//! Non-durable fan-out of human-readable progress updates (spec.md §4.5).
//!
//! Late subscribers miss earlier events; publishing with no subscribers is a
//! no-op rather than an error.

use crate::types::ProgressUpdate;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1000;

/// Broadcasts [`ProgressUpdate`]s to any number of subscribers.
#[derive(Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<ProgressUpdate>,
}

impl ProgressBus {
    /// Construct a bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Construct a bus with an explicit channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to future progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.tx.subscribe()
    }

    /// Publish an update. Dropped silently if nobody is listening.
    pub fn publish(&self, update: ProgressUpdate) {
        self.tx.send(update).ok();
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}
