//! Error types for the scrape orchestrator.

use thiserror::Error;

/// Scrape-wide failures. A snapshot is produced regardless.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScrapeError {
    #[error("no targets configured")]
    NoTargets,

    /// The task running the scrape ended without publishing a result.
    #[error("scrape task aborted")]
    Aborted,
}

/// Rejected runtime timeout change.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TimeoutError {
    #[error("timeout {0} is outside 1<v<15")]
    OutOfRange(i64),
}
