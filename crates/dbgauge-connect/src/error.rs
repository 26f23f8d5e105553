//! Error types for the connect phase.

use std::fmt;

use thiserror::Error;

use dbgauge_core::DriverError;

/// Step of the connect sequence a timeout interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    Connect,
    Ping,
}

impl fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectPhase::Connect => write!(f, "connect"),
            ConnectPhase::Ping => write!(f, "ping"),
        }
    }
}

/// Why a target produced no handle this scrape.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectError {
    /// Inventory entry without a descriptor; always down, never an error.
    #[error("target has no connection descriptor")]
    Placeholder,

    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The scrape deadline passed while the target was still connecting.
    #[error("deadline exceeded during {0}")]
    Timeout(ConnectPhase),
}

impl ConnectError {
    /// Error counter category, or `None` when the outcome is not a fault.
    pub fn category(&self) -> Option<&'static str> {
        match self {
            ConnectError::Placeholder => None,
            ConnectError::Driver(_) => Some("connect"),
            ConnectError::Timeout(_) => Some("probe_timeout"),
        }
    }
}
