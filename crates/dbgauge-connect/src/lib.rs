//! dbgauge-connect — reaching the targets.
//!
//! Opens one connection per target in parallel under a shared deadline and
//! hands each success to its collector task as an exclusively owned
//! [`TargetHandle`]. Also provides the production Postgres [`Driver`]
//! and the connectivity probe used by the `/testConn` route.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager::connect_all(targets, deadline)
//!   ├── placeholder targets → ConnectOutcome { Err(Placeholder) }, no task
//!   └── one task per target: connect → ping → identity (best effort)
//!         └── try_send(ConnectOutcome) into a channel sized to the target count
//! ConnectStream::next_before(deadline)  ← orchestrator, stops waiting at the deadline
//! ```
//!
//! [`Driver`]: dbgauge_core::Driver

pub mod error;
pub mod manager;
pub mod postgres;
pub mod probe;

pub use error::{ConnectError, ConnectPhase};
pub use manager::{ConnectOutcome, ConnectStream, ConnectionManager, TargetHandle};
pub use postgres::PostgresDriver;
pub use probe::{
    PROBE_MARKER, ProbeError, ProbeMode, ProbeReport, ProbeSample, Prober, UNPARSABLE_ELAPSED,
    format_elapsed, parse_probe_output, probe_all, probe_target,
};
