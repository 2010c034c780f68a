//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::StorageError;

/// Errors emitted by `ProgressStore` implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressStoreError {
    /// The server understood the request and refused it, e.g. completion
    /// prerequisites are not met.
    #[error("progress store rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("progress store request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("progress store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors emitted by `WatchTracker`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrackerError {
    #[error("no lesson is open")]
    NoActiveLesson,
    #[error("lesson cannot be completed yet: {message}")]
    CompletionRejected { message: String },
    #[error(transparent)]
    Store(#[from] ProgressStoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while reading service configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{name} is not set")]
    Missing { name: &'static str },
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
