//! dbgauge-core — shared model for the dbgauge exporter.
//!
//! Everything the other crates agree on lives here: the immutable target
//! model, metric family descriptors, the database driver seam, the naming
//! rules used for metric and label names, and the target file loader.
//!
//! # Architecture
//!
//! ```text
//! targets.toml ──parse/validate──▶ TargetSet (immutable, Arc-shared)
//!                                   ├── Vec<Arc<TargetDescriptor>>
//!                                   └── custom families (query name → FamilyDesc)
//!
//! Driver ──connect()──▶ Box<dyn Connection> ──query()──▶ QueryResult
//! ```

pub mod config;
pub mod driver;
pub mod metric;
pub mod naming;
pub mod types;

#[cfg(feature = "test-util")]
pub mod mock;

pub use config::{ConfigError, TargetSet, TargetsFile};
pub use driver::{Connection, Driver, DriverError};
pub use metric::{CollectOptions, Feature, FamilyDesc, MetricKind, Scope, NAMESPACE};
pub use naming::{clean_name, is_valid_identifier, redact_descriptor, split_conn_str};
pub use types::{CustomQuerySpec, QueryResult, TargetDescriptor, Value};
