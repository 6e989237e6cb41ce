//! Database layer for kaizoku-core
//!
//! Handles SQLite persistence for series, providers (with embedded chapters),
//! the download queue, and event-log outcomes.
//!
//! ## Submodules
//!
//! Methods on [`Store`] are organized by domain:
//! - [`migrations`] — database lifecycle, schema migrations
//! - [`series`] — series CRUD
//! - [`providers`] — provider CRUD, embedded chapter read-modify-write
//! - [`queue`] — download queue CRUD, dispatcher-facing queries
//! - [`events`] — event-log outcome records

use sqlx::sqlite::SqlitePool;

mod events;
mod migrations;
mod providers;
mod queue;
mod series;

pub use events::{EventOutcome, NewEventOutcome};
pub use queue::QueueRunningCounts;

/// Database handle for kaizoku-core
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}
