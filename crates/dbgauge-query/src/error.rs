//! Error types for query evaluation.

use thiserror::Error;

use dbgauge_core::DriverError;

/// Failure of one custom query on one target.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CustomQueryError {
    #[error("custom query {query} failed: {source}")]
    Exec {
        query: String,
        #[source]
        source: DriverError,
    },

    /// A declared label column is absent from the result; the query emits nothing.
    #[error("custom query {query}: label column {label} not found")]
    LabelMismatch { query: String, label: String },

    #[error("custom query {query} hit the scrape deadline")]
    Timeout { query: String },
}

impl CustomQueryError {
    /// Error counter category; deadline truncation is not counted.
    pub fn category(&self) -> Option<&'static str> {
        match self {
            CustomQueryError::Exec { .. } => Some("custom_exec"),
            CustomQueryError::LabelMismatch { .. } => Some("custom_labels"),
            CustomQueryError::Timeout { .. } => None,
        }
    }
}

/// Failure of one built-in collector on one target.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollectorError {
    #[error("collector {collector} failed: {source}")]
    Exec {
        collector: &'static str,
        #[source]
        source: DriverError,
    },

    #[error("collector {collector}: unexpected result shape: {reason}")]
    Shape {
        collector: &'static str,
        reason: String,
    },

    #[error("collector {collector} hit the scrape deadline")]
    Timeout { collector: &'static str },
}

impl CollectorError {
    /// Error counter category (the collector name); deadline truncation is not counted.
    pub fn category(&self) -> Option<&'static str> {
        match self {
            CollectorError::Exec { collector, .. } | CollectorError::Shape { collector, .. } => {
                Some(collector)
            }
            CollectorError::Timeout { .. } => None,
        }
    }
}
