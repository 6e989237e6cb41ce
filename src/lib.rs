//! # kaizoku-core
//!
//! Ingestion pipeline core for a comic/manga library manager: a fair-share
//! download dispatcher, cross-source cascade/replacement logic, a chapter
//! orchestrator that reconciles remote chapter lists against local state, and
//! an integrity verifier that detects and repairs damaged archives.
//!
//! ## Design Philosophy
//!
//! kaizoku-core is designed to be:
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - consumers subscribe to progress updates, no polling required
//! - **Source-agnostic** - all remote access goes through the [`ExtensionClient`] seam
//!
//! ## Quick Start
//!
//! ```no_run
//! use kaizoku_core::{Config, DownloadDispatcher, Store, CascadeController, EventLogger, ProgressBus};
//! use kaizoku_core::extension_client::NoOpExtensionClient;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let store = Store::new(config.database_path()).await?;
//!
//!     let cascade = CascadeController::new(store.clone(), config.retry.clone(), config.storage_root().clone());
//!     let dispatcher = DownloadDispatcher::new(
//!         store.clone(),
//!         Arc::new(NoOpExtensionClient),
//!         ProgressBus::new(),
//!         EventLogger::new(store.clone()),
//!         cascade,
//!         config.dispatch.clone(),
//!         config.storage_root().clone(),
//!     );
//!
//!     let cancel = CancellationToken::new();
//!     kaizoku_core::run_with_shutdown(&dispatcher, cancel).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Retry/backoff scheduling helpers
pub mod backoff;
/// Archive container format (build/read/classify)
pub mod archive;
/// Cross-source cascade and replacement-upgrade state machine
pub mod cascade;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Polling fair-share download dispatcher
pub mod dispatcher;
/// Error types
pub mod error;
/// Per-call outcome recording and error-category taxonomy
pub mod event_logger;
/// Extension-host adapter seam
pub mod extension_client;
/// Filename grammars for archives and pages
pub mod naming;
/// Chapter-list reconciliation between remote sources and local state
pub mod orchestrator;
/// Non-durable progress broadcast
pub mod progress;
/// Series-level metadata sidecar (index.json)
pub mod sidecar;
/// Core types and events
pub mod types;
/// Archive integrity scanning and repair
pub mod verifier;

// Re-export commonly used types
pub use cascade::CascadeController;
pub use config::Config;
pub use db::Store;
pub use dispatcher::DownloadDispatcher;
pub use error::{ArchiveError, DatabaseError, DispatchError, Error, ExtensionError, Result};
pub use event_logger::EventLogger;
pub use extension_client::ExtensionClient;
pub use orchestrator::ChapterOrchestrator;
pub use progress::ProgressBus;
pub use types::{
    Chapter, DownloadArgs, DownloadQueueItem, Provider, ProviderFlags, ProviderId, QueueCounts,
    QueueStatus, Series, SeriesId, SeriesStatus, SeriesType,
};
pub use verifier::IntegrityVerifier;

use tokio_util::sync::CancellationToken;

/// Run a dispatcher with graceful signal handling.
///
/// Waits for a termination signal, cancels `cancel`, and then waits for the
/// dispatcher's `run` loop to drain in-flight downloads and return.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(
    dispatcher: &DownloadDispatcher,
    cancel: CancellationToken,
) -> Result<()> {
    let run_handle = {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run(cancel).await })
    };

    wait_for_signal().await;
    cancel.cancel();

    match run_handle.await {
        Ok(result) => result,
        Err(e) => Err(Error::Other(format!("dispatcher task panicked: {e}"))),
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM");
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("received SIGINT (Ctrl+C)");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("received SIGTERM");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("received Ctrl+C");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        }
    }
}
