//! dbgauge-query — turning result sets into series.
//!
//! Two producers share one output shape, [`Series`]:
//!
//! - [`custom`]: user-declared [`CustomQuerySpec`](dbgauge_core::CustomQuerySpec)s,
//!   with column matching by normalized name and typed label coercion.
//! - [`builtin`]: the fixed catalogue of Postgres collectors, each a
//!   declarative SQL text plus a result shape.
//!
//! Neither writes to the metric store. The orchestrator owns that.

pub mod builtin;
pub mod coerce;
pub mod custom;
pub mod error;

pub use builtin::{BuiltinCollector, Builtins, Shape};
pub use coerce::{format_label_value, format_sci};
pub use custom::{run_custom_query, series_from_result};
pub use error::{CollectorError, CustomQueryError};

/// One sample: label values in family order plus the value.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub labels: Vec<String>,
    pub value: f64,
}

impl Series {
    pub fn new(labels: Vec<String>, value: f64) -> Self {
        Self { labels, value }
    }
}
