//! Error types for kaizoku-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kaizoku-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for kaizoku-core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Extension-host call failed
    #[error("extension error: {0}")]
    Extension(#[from] ExtensionError),

    /// Archive read/write failed
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Dispatcher-level error (bad queue item, cancelled, etc.)
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress, not accepting new work
    #[error("shutdown in progress: not accepting new work")]
    ShuttingDown,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Series has downloads paused
    #[error("series {0} has downloads paused")]
    SeriesPaused(i64),

    /// Every candidate provider in a cascade was exhausted
    #[error("cascade exhausted for chapter {chapter:?} of series {series_id}: {reason}")]
    CascadeExhausted {
        /// The series that ran out of fallback providers
        series_id: i64,
        /// Chapter number, if known
        chapter: Option<f64>,
        /// Why the last candidate failed
        reason: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g. duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Extension-host call errors (spec.md §6 ExtensionClient)
#[derive(Debug, Error)]
pub enum ExtensionError {
    /// The named extension has no live source registered
    #[error("extension {0} not found")]
    NotFound(String),

    /// The extension call exceeded its configured timeout
    #[error("extension call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The extension call returned an application-level error
    #[error("extension call failed: {0}")]
    CallFailed(String),

    /// The remote chapter page list was empty or malformed
    #[error("invalid chapter pages for {0}")]
    InvalidPages(String),
}

/// Archive read/write errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Underlying zip library error
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The archive has no embedded metadata sidecar entry
    #[error("no metadata found in {0}")]
    NoMetadata(PathBuf),

    /// The archive contains zero image pages
    #[error("archive {0} has no image pages")]
    EmptyArchive(PathBuf),

    /// Atomic write (temp file + rename) failed
    #[error("failed to finalize archive write for {path}: {reason}")]
    WriteFailed {
        /// Destination path the archive was being written to
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },
}

/// Dispatcher-level errors
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Queue item not found
    #[error("queue item {0} not found")]
    NotFound(String),

    /// Cannot perform operation in current state
    #[error("cannot {operation} queue item {id} in state {current_state}")]
    InvalidState {
        /// The queue item id that is in an invalid state for the operation
        id: String,
        /// The operation that was attempted (e.g. "cancel", "retry")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },

    /// Download execution was cancelled mid-flight
    #[error("download {0} was cancelled")]
    Cancelled(String),
}

impl From<uuid::Error> for Error {
    fn from(e: uuid::Error) -> Self {
        Error::Other(format!("invalid queue item id: {e}"))
    }
}
