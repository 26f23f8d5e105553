//! Probe mode — the hidden `--testconn` entry point.
//!
//! The parent process re-invokes itself with `--testconn` when probes are
//! isolated. This mode probes every configured target once and writes one
//! protocol line per reachable target on stderr, which the parent parses.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use dbgauge_connect::{PostgresDriver, probe_all};
use dbgauge_core::TargetSet;

/// Arguments the parent passes to a probe child. The prober appends the
/// `--timeout` in force when each probe runs.
pub fn child_args(configfile: &Path) -> Vec<String> {
    vec![
        "--testconn".to_string(),
        "--configfile".to_string(),
        configfile.display().to_string(),
    ]
}

/// Probe every target in `configfile` and print the result lines.
pub async fn run_testconn(configfile: &Path, timeout: u64) -> anyhow::Result<()> {
    let set = TargetSet::from_file(configfile)?;
    info!(targets = set.len(), "probing targets");

    let reports = probe_all(Arc::new(PostgresDriver::new()), set.targets(), Duration::from_secs(timeout)).await;
    for line in reports.iter().filter_map(|r| r.to_line()) {
        eprintln!("{line}");
    }
    Ok(())
}
