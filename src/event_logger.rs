//! Records per-call outcomes to the event log, with the fixed error
//! categorization taxonomy used by the cascade and surfaced to operators
//! (spec.md §4.5, §7).

use crate::db::{NewEventOutcome, Store};
use crate::error::{Error, ExtensionError};
use crate::Result;
use std::time::Duration;

/// Fixed error-category taxonomy (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection refused, reset, DNS failure
    Network,
    /// Deadline exceeded
    Timeout,
    /// HTTP 429 or explicit throttle
    RateLimit,
    /// HTTP 5xx
    ServerError,
    /// HTTP 404 — the sentinel that terminates the page loop
    NotFound,
    /// Unexpected payload shape
    Parse,
    /// Caller-cancelled context
    Cancelled,
    /// Anything else
    Unknown,
}

impl ErrorCategory {
    /// The string stored in the `error_category` column.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Parse => "parse",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

/// Classify an error into the fixed taxonomy. Errors that carry no transport
/// information of their own (database, config, archive) fall through to
/// `Unknown`; callers that know more about the failure (e.g. an HTTP status
/// code behind [`ExtensionError::CallFailed`]) should prefer a more specific
/// classification where one is available.
pub fn classify(err: &Error) -> ErrorCategory {
    match err {
        Error::Extension(ExtensionError::NotFound(_)) => ErrorCategory::NotFound,
        Error::Extension(ExtensionError::Timeout(_)) => ErrorCategory::Timeout,
        Error::Extension(ExtensionError::InvalidPages(_)) => ErrorCategory::Parse,
        Error::Extension(ExtensionError::CallFailed(message)) => classify_message(message),
        Error::Dispatch(crate::error::DispatchError::Cancelled(_)) => ErrorCategory::Cancelled,
        Error::ShuttingDown => ErrorCategory::Cancelled,
        Error::Io(io_err) => classify_io(io_err),
        _ => ErrorCategory::Unknown,
    }
}

fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_ascii_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("throttle") {
        ErrorCategory::RateLimit
    } else if lower.contains("404") || lower.contains("not found") {
        ErrorCategory::NotFound
    } else if lower.contains("5") && lower.contains("server error") {
        ErrorCategory::ServerError
    } else if lower.contains("timeout") || lower.contains("timed out") {
        ErrorCategory::Timeout
    } else if lower.contains("connection") || lower.contains("dns") || lower.contains("reset") {
        ErrorCategory::Network
    } else if lower.contains("parse") || lower.contains("unexpected payload") {
        ErrorCategory::Parse
    } else {
        ErrorCategory::Unknown
    }
}

fn classify_io(err: &std::io::Error) -> ErrorCategory {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::AddrNotAvailable => {
            ErrorCategory::Network
        }
        ErrorKind::TimedOut => ErrorCategory::Timeout,
        ErrorKind::NotFound => ErrorCategory::NotFound,
        ErrorKind::Interrupted => ErrorCategory::Cancelled,
        _ => ErrorCategory::Unknown,
    }
}

/// Shape of one call worth recording — built by callers (orchestrator,
/// dispatcher execution) as they complete an extension-host round trip.
pub struct CallOutcome<'a> {
    /// Source id the call targeted, if known
    pub source_id: Option<i64>,
    /// Source name, for display without a join
    pub source_name: Option<&'a str>,
    /// Language, for display without a join
    pub language: Option<&'a str>,
    /// Coarse event type, e.g. "fetch_chapters", "download_page"
    pub event_type: &'a str,
    /// How long the call took
    pub duration: Duration,
    /// `Ok(n)` records success with an item count; `Err(e)` records failure
    pub result: std::result::Result<i64, &'a Error>,
    /// Arbitrary structured metadata to attach
    pub metadata: Option<serde_json::Value>,
}

/// Thin wrapper around [`Store::record_event`] that applies the error
/// categorization taxonomy before persisting.
#[derive(Clone)]
pub struct EventLogger {
    store: Store,
}

impl EventLogger {
    /// Construct a logger over the given store.
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record one call outcome.
    pub async fn record(&self, outcome: CallOutcome<'_>) -> Result<i64> {
        let (status, error, error_category, items_count) = match outcome.result {
            Ok(count) => ("ok".to_string(), None, None, Some(count)),
            Err(e) => (
                "error".to_string(),
                Some(e.to_string()),
                Some(classify(e).as_str().to_string()),
                None,
            ),
        };

        self.store
            .record_event(&NewEventOutcome {
                source_id: outcome.source_id,
                source_name: outcome.source_name.map(str::to_string),
                language: outcome.language.map(str::to_string),
                event_type: outcome.event_type.to_string(),
                status,
                duration_ms: outcome.duration.as_millis() as i64,
                error,
                error_category,
                items_count,
                metadata: outcome.metadata,
            })
            .await
    }
}
