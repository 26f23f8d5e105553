//! Database driver seam.
//!
//! The exporter never talks to a database directly; it goes through a
//! [`Driver`] that opens [`Connection`]s. The production implementation lives
//! in `dbgauge-connect`; tests inject scripted drivers.
//!
//! Deadlines are not part of the trait. Callers wrap every call in
//! `tokio::time::timeout_at`, and dropping the future is the cancellation
//! signal.

use thiserror::Error;

use crate::types::QueryResult;

/// Errors reported by a driver or one of its connections.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DriverError {
    /// The connection could not be opened.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The readiness probe failed on an open connection.
    #[error("ping failed: {0}")]
    Ping(String),

    /// A query failed to execute.
    #[error("query failed: {0}")]
    Query(String),

    /// A result value could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Opens connections from descriptors.
#[async_trait::async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Open a new connection for `descriptor`.
    async fn connect(&self, descriptor: &str) -> Result<Box<dyn Connection>, DriverError>;
}

/// One open database session, exclusively owned by a single task.
#[async_trait::async_trait]
pub trait Connection: Send + 'static {
    /// Lightweight readiness probe.
    async fn ping(&mut self) -> Result<(), DriverError>;

    /// Discover `(database, instance)` display names.
    async fn identity(&mut self) -> Result<(String, String), DriverError>;

    /// Run `sql` and materialize the whole result.
    async fn query(&mut self, sql: &str) -> Result<QueryResult, DriverError>;

    /// Release the session.
    async fn close(self: Box<Self>);
}
