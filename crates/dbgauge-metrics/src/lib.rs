//! dbgauge-metrics — the metric store and its exposition.
//!
//! Families are described by [`FamilyDesc`](dbgauge_core::FamilyDesc) and
//! created lazily on first write. Dynamic families belong to one scrape and
//! are cleared by [`MetricStore::reset_dynamic`]; lifetime families
//! (scrape counters, timing histograms) live for the whole process in a
//! `prometheus` registry and are encoded with its text encoder.
//!
//! # Architecture
//!
//! ```text
//! MetricStore
//!   ├── reset_dynamic() → ScrapeWriter      ← start of every scrape (new epoch)
//!   │     └── upsert(desc, labels, value)   ← collector tasks, concurrently
//!   ├── inc_counter() / set_gauge() / observe()   ← lifetime families
//!   └── render() → MetricSnapshot
//!         └── to_prometheus(options) → text/plain for the metrics path
//! ```

pub mod error;
pub mod exposition;
mod lifetime;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use exposition::{encode_families, render_prometheus};
pub use store::{FamilySnapshot, MetricSnapshot, MetricStore, Sample, SampleValue, ScrapeWriter};
