//! Error types for the metric store.

use thiserror::Error;

use dbgauge_core::FamilyDesc;

/// Result type alias for metric store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur when writing to the metric store.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("family {0} is already registered with a different descriptor")]
    Conflict(String),

    #[error("family {name} expects {expected} label values, got {got}")]
    LabelArity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("family {name} is a {kind}, cannot {op}")]
    WrongKind {
        name: String,
        kind: &'static str,
        op: &'static str,
    },

    #[error("family {0} has the wrong scope for this operation")]
    WrongScope(String),

    /// The lifetime registry refused a family or label set.
    #[error("metric registry rejected {name}: {reason}")]
    Registry { name: String, reason: String },

    /// The writer belongs to a scrape whose series were already reset.
    #[error("stale write to {name}: epoch {epoch}, store is at {current}")]
    Stale {
        name: String,
        epoch: u64,
        current: u64,
    },
}

impl StoreError {
    /// Stale writes are expected from abandoned tasks and are not faults.
    pub fn is_stale(&self) -> bool {
        matches!(self, StoreError::Stale { .. })
    }

    pub(crate) fn wrong_kind(desc: &FamilyDesc, op: &'static str) -> Self {
        StoreError::WrongKind {
            name: desc.name.clone(),
            kind: desc.kind.type_name(),
            op,
        }
    }
}
