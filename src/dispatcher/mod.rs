//! Polling scheduler that drains the download queue under global and
//! per-group concurrency limits with fair-share ordering (spec.md §4.1).
//!
//! ## Submodules
//!
//! - [`tick`] — the fair-share dispatch algorithm run once per poll interval
//! - [`execute`] — per-item download execution
//! - [`control`] — caller-facing operations (enqueue/retry/delete/cancel/pause) and metrics

mod control;
mod execute;
mod tick;

use crate::cascade::CascadeController;
use crate::config::DispatchConfig;
use crate::db::Store;
use crate::event_logger::EventLogger;
use crate::extension_client::ExtensionClient;
use crate::progress::ProgressBus;
use crate::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Drains the download queue, launching independent tasks under the
/// configured `MaxTotal`/`MaxGroup` caps.
///
/// A tick-scoped mutex keeps the in-memory view of "just launched this tick"
/// consistent with the database rows it is about to transition; the database
/// remains the authoritative source of running counts (spec.md §5).
#[derive(Clone)]
pub struct DownloadDispatcher {
    store: Store,
    extension_client: Arc<dyn ExtensionClient>,
    progress: ProgressBus,
    event_logger: EventLogger,
    cascade: CascadeController,
    config: DispatchConfig,
    storage_root: PathBuf,
    tick_lock: Arc<tokio::sync::Mutex<()>>,
}

impl DownloadDispatcher {
    /// Construct a dispatcher over the given collaborators.
    pub fn new(
        store: Store,
        extension_client: Arc<dyn ExtensionClient>,
        progress: ProgressBus,
        event_logger: EventLogger,
        cascade: CascadeController,
        config: DispatchConfig,
        storage_root: PathBuf,
    ) -> Self {
        Self {
            store,
            extension_client,
            progress,
            event_logger,
            cascade,
            config,
            storage_root,
            tick_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Run the dispatch loop until `cancel` fires.
    ///
    /// On startup, any items left `running` from a prior process crash are
    /// reset to `waiting`. Cancellation stops scheduling new work and waits
    /// for in-flight downloads to finish before returning; those downloads
    /// run on independent tasks and are not themselves aborted (spec.md §5).
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let reset = self.store.reset_running_to_waiting().await?;
        if reset > 0 {
            warn!(count = reset, "reset stale running items to waiting on startup");
        }

        let mut in_flight: JoinSet<()> = JoinSet::new();
        let interval = self.config.tick_interval;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("dispatcher shutting down, draining in-flight downloads");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick(&mut in_flight).await {
                        warn!(error = %e, "dispatch tick failed");
                    }
                }
                Some(_) = in_flight.join_next() => {}
            }
        }

        while in_flight.join_next().await.is_some() {}
        Ok(())
    }
}
